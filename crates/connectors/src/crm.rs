//! CRM login and session probe.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use bridgesync_core::config::{CrmConfig, SyncConfig};
use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::{AuthenticationError, SyncError};

use crate::http::{build_client, endpoint, status_error, transport_error, upstream_message};
use crate::session::{AuthScheme, Authenticator, SessionCredential};

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub struct CrmAuthenticator {
    client: Client,
    config: CrmConfig,
    probe_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrmLoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    device_id: &'a str,
    platform_type: &'a str,
    os: &'a str,
    os_version: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrmLoginResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<Value>,
}

impl CrmAuthenticator {
    pub fn new(config: CrmConfig, sync: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(SystemType::Crm, sync.auth_timeout())?,
            config,
            probe_timeout: sync.probe_timeout(),
        })
    }
}

#[async_trait]
impl Authenticator for CrmAuthenticator {
    fn system(&self) -> SystemType {
        SystemType::Crm
    }

    fn scheme(&self) -> AuthScheme {
        AuthScheme::Bearer
    }

    async fn authenticate(&self) -> Result<SessionCredential, SyncError> {
        let username = self.config.username.as_deref().filter(|value| !value.is_empty());
        let password = self.config.password.as_ref().map(|value| value.expose_secret());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(SyncError::Configuration(
                "crm.username and crm.password must be configured".to_string(),
            ));
        };

        let url =
            endpoint(SystemType::Crm, self.config.base_url.as_deref(), &self.config.login_path)?;
        let body = CrmLoginRequest {
            username,
            password,
            device_id: &self.config.device_id,
            platform_type: &self.config.platform_type,
            os: &self.config.os,
            os_version: &self.config.os_version,
            token: &self.config.device_token,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(SystemType::Crm, error))?;

        let status = response.status();
        if !status.is_success() {
            let message = upstream_message(response).await;
            return Err(match status {
                StatusCode::PAYMENT_REQUIRED => {
                    AuthenticationError::ModuleUnavailable { system: SystemType::Crm, message }
                        .into()
                }
                status => status_error(SystemType::Crm, status, message),
            });
        }

        let issued_at = Utc::now();
        let payload: CrmLoginResponse = response.json().await.map_err(|error| {
            AuthenticationError::Failed {
                system: SystemType::Crm,
                message: format!("could not decode login response: {error}"),
            }
        })?;

        let expires_at = payload.expires_at.as_ref().and_then(parse_expires_at);
        if expires_at.is_none() {
            warn!(
                event_name = "session.crm.expiry_unknown",
                system = %SystemType::Crm,
                "crm login response carried no usable expiresAt; token kept until invalidated"
            );
        }

        Ok(SessionCredential {
            token: payload.access_token.unwrap_or_default(),
            refresh_token: payload.refresh_token,
            expires_at,
            issued_at,
            fiscal_year: None,
        })
    }

    async fn probe(&self, credential: &SessionCredential) -> Result<(), SyncError> {
        let url =
            endpoint(SystemType::Crm, self.config.base_url.as_deref(), &self.config.probe_path)?;
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, AuthScheme::Bearer.header_value(&credential.token))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|error| transport_error(SystemType::Crm, error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = upstream_message(response).await;
        Err(status_error(SystemType::Crm, status, message))
    }
}

/// Accepts RFC 3339 strings and epoch seconds or milliseconds, as numbers or numeric strings.
fn parse_expires_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            DateTime::parse_from_rfc3339(raw)
                .map(|timestamp| timestamp.with_timezone(&Utc))
                .ok()
                .or_else(|| raw.parse::<i64>().ok().and_then(from_epoch))
        }
        Value::Number(number) => number.as_i64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}
