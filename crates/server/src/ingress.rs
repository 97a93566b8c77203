//! Webhook ingress gate.
//!
//! Every inbound change notification is authenticated, checked against the
//! CRM-priority policy and the loop detector, and answered with a `sync` or
//! `skip` decision. The remote write itself belongs to the caller.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use bridgesync_core::config::AppConfig;
use bridgesync_core::errors::{InterfaceError, SyncError};
use bridgesync_core::{
    payload_checksum, ConflictResolver, EntityMappingStore, LoopDetector, SystemType,
    WebhookSignatureValidator, Winner,
};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const FALLBACK_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub const REASON_LOOP: &str = "Loop detected - change echoes a recent sync";
pub const REASON_UNCHANGED: &str = "Data unchanged since last sync";

#[derive(Clone)]
pub struct IngressState {
    gate: Arc<IngressGate>,
}

struct IngressGate {
    crm_validator: WebhookSignatureValidator,
    finance_validator: WebhookSignatureValidator,
    resolver: ConflictResolver,
    loop_detector: LoopDetector<Arc<dyn EntityMappingStore>>,
}

impl IngressState {
    pub fn new(
        crm_validator: WebhookSignatureValidator,
        finance_validator: WebhookSignatureValidator,
        loop_detector: LoopDetector<Arc<dyn EntityMappingStore>>,
    ) -> Self {
        Self {
            gate: Arc::new(IngressGate {
                crm_validator,
                finance_validator,
                resolver: ConflictResolver::new(),
                loop_detector,
            }),
        }
    }

    pub fn from_config(config: &AppConfig, store: Arc<dyn EntityMappingStore>) -> Self {
        Self::new(
            WebhookSignatureValidator::from_config(config, SystemType::Crm),
            WebhookSignatureValidator::from_config(config, SystemType::Finance),
            LoopDetector::with_window(store, config.sync.loop_window()),
        )
    }

    fn validator(&self, system: SystemType) -> &WebhookSignatureValidator {
        match system {
            SystemType::Crm => &self.gate.crm_validator,
            SystemType::Finance => &self.gate.finance_validator,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEnvelope {
    entity_type: String,
    entity_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    target_system: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Sync,
    Skip,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookDecision {
    pub action: WebhookAction,
    pub reason: String,
    pub winner: Winner,
    pub checksum: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    correlation_id: String,
}

pub struct IngressRejection(InterfaceError);

impl IntoResponse for IngressRejection {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let correlation_id = self.0.correlation_id().to_string();
        let body =
            ErrorBody { error: self.0.user_message(), correlation_id: correlation_id.clone() };

        (status, [(CORRELATION_HEADER, correlation_id)], Json(body)).into_response()
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new().route("/api/v1/webhooks/{system}", post(receive_webhook)).with_state(state)
}

pub async fn receive_webhook(
    State(state): State<IngressState>,
    Path(system): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressRejection> {
    let correlation_id = correlation_id(&headers);
    let Some(source) = SystemType::parse(&system) else {
        return Err(bad_request(format!("unknown system `{system}`"), &correlation_id));
    };

    let verified = state
        .validator(source)
        .verify(&body, signature_header(&headers))
        .map_err(|error| reject(error, source, &correlation_id))?;
    if !verified {
        return Err(IngressRejection(InterfaceError::Unauthorized {
            message: format!("{source} webhook signature was not accepted"),
            correlation_id,
        }));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|error| {
        bad_request(format!("malformed webhook body: {error}"), &correlation_id)
    })?;
    if envelope.entity_type.trim().is_empty() || envelope.entity_id.trim().is_empty() {
        return Err(bad_request(
            "entityType and entityId must not be empty".to_string(),
            &correlation_id,
        ));
    }

    let target = match envelope.target_system.as_deref() {
        None => source.counterpart(),
        Some(raw) => SystemType::parse(raw).ok_or_else(|| {
            bad_request(format!("unknown target system `{raw}`"), &correlation_id)
        })?,
    };

    info!(
        event_name = "sync.webhook.received",
        correlation_id = %correlation_id,
        system = %source,
        target_system = %target,
        entity_type = %envelope.entity_type,
        entity_id = %envelope.entity_id,
        "webhook accepted for evaluation"
    );

    let decision = evaluate(&state, source, target, &envelope)
        .await
        .map_err(|error| reject(error, source, &correlation_id))?;

    info!(
        event_name = "sync.webhook.decided",
        correlation_id = %correlation_id,
        system = %source,
        entity_type = %envelope.entity_type,
        entity_id = %envelope.entity_id,
        action = ?decision.action,
        reason = %decision.reason,
        "webhook decision made"
    );

    Ok(([(CORRELATION_HEADER, correlation_id)], Json(decision)).into_response())
}

async fn evaluate(
    state: &IngressState,
    source: SystemType,
    target: SystemType,
    envelope: &WebhookEnvelope,
) -> Result<WebhookDecision, SyncError> {
    let gate = &state.gate;
    let checksum = envelope.data.as_ref().map(payload_checksum);
    let decision = gate.resolver.decide(source, target);
    if !decision.should_sync {
        return Ok(WebhookDecision {
            action: WebhookAction::Skip,
            reason: decision.reason.to_string(),
            winner: decision.winner,
            checksum,
        });
    }

    // A fresh id never matches the stored one, leaving only the cool-down check.
    let transaction_id = envelope
        .transaction_id
        .clone()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let looped = gate
        .loop_detector
        .is_loop(&envelope.entity_type, &envelope.entity_id, source, &transaction_id)
        .await?;
    if looped {
        return Ok(WebhookDecision {
            action: WebhookAction::Skip,
            reason: REASON_LOOP.to_string(),
            winner: decision.winner,
            checksum,
        });
    }

    if let Some(checksum) = checksum.as_deref() {
        let unchanged = gate
            .loop_detector
            .is_data_unchanged(&envelope.entity_type, &envelope.entity_id, source, checksum)
            .await?;
        if unchanged {
            return Ok(WebhookDecision {
                action: WebhookAction::Skip,
                reason: REASON_UNCHANGED.to_string(),
                winner: decision.winner,
                checksum: Some(checksum.to_string()),
            });
        }
    }

    Ok(WebhookDecision {
        action: WebhookAction::Sync,
        reason: decision.reason.to_string(),
        winner: decision.winner,
        checksum,
    })
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(FALLBACK_SIGNATURE_HEADER))
        .and_then(|value| value.to_str().ok())
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bad_request(message: String, correlation_id: &str) -> IngressRejection {
    IngressRejection(InterfaceError::BadRequest {
        message,
        correlation_id: correlation_id.to_string(),
    })
}

fn reject(error: SyncError, system: SystemType, correlation_id: &str) -> IngressRejection {
    warn!(
        event_name = "sync.webhook.rejected",
        correlation_id,
        system = %system,
        error_class = error.error_class(),
        error = %error,
        "webhook rejected"
    );
    IngressRejection(error.into_interface(correlation_id))
}
