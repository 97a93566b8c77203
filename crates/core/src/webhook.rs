//! Inbound webhook authenticity checks.
//!
//! Senders sign the raw request body with HMAC-SHA256 under a shared secret
//! and put the lower-case hex digest in a header, optionally prefixed with
//! `sha256=`. Verification must run on the exact body bytes, before any JSON
//! parsing, and compares digests in constant time.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::config::{AppConfig, WebhookSecurityMode};
use crate::domain::system::SystemType;
use crate::errors::{AuthenticationError, SyncError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

pub struct WebhookSignatureValidator {
    system: SystemType,
    secret: Option<SecretString>,
    mode: WebhookSecurityMode,
}

impl WebhookSignatureValidator {
    pub fn new(system: SystemType, secret: Option<SecretString>, mode: WebhookSecurityMode) -> Self {
        let secret = secret.filter(|value| !value.expose_secret().is_empty());
        Self { system, secret, mode }
    }

    pub fn from_config(config: &AppConfig, system: SystemType) -> Self {
        Self::new(system, config.webhook_secret(system).cloned(), config.sync.webhook_mode)
    }

    pub fn system(&self) -> SystemType {
        self.system
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Pulls the hex digest out of the signature header.
    pub fn extract_signature(&self, header: Option<&str>) -> Result<String, SyncError> {
        let header = header.filter(|value| !value.trim().is_empty()).ok_or(
            AuthenticationError::MissingWebhookSignature { system: self.system },
        )?;

        Ok(header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header).to_string())
    }

    pub fn generate_signature(&self, payload: &[u8]) -> Result<String, SyncError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            SyncError::Configuration(format!("{}.webhook_secret is not configured", self.system))
        })?;
        sign_payload(secret.expose_secret().as_bytes(), payload).map_err(|message| {
            AuthenticationError::Failed { system: self.system, message }.into()
        })
    }

    pub fn validate_signature(&self, payload: &[u8], signature: &str) -> Result<bool, SyncError> {
        let Some(secret) = self.secret.as_ref() else {
            return match self.mode {
                WebhookSecurityMode::FailOpen => {
                    warn!(
                        event_name = "security.webhook.fail_open",
                        system = %self.system,
                        "webhook secret is not configured; accepting payload without verification"
                    );
                    Ok(true)
                }
                WebhookSecurityMode::FailClosed => Err(SyncError::Configuration(format!(
                    "{}.webhook_secret is not configured and webhook mode is fail_closed",
                    self.system
                ))),
            };
        };

        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).map_err(
            |err| AuthenticationError::Failed {
                system: self.system,
                message: format!("could not initialise webhook hmac: {err}"),
            },
        )?;
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let provided = hex::decode(signature).map_err(|err| {
            warn!(
                event_name = "security.webhook.undecodable_signature",
                system = %self.system,
                error = %err,
                "webhook signature is not valid hex"
            );
            AuthenticationError::InvalidWebhookSignature { system: self.system }
        })?;

        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            error!(
                event_name = "security.webhook.signature_mismatch",
                system = %self.system,
                "webhook signature verification failed"
            );
            return Err(AuthenticationError::InvalidWebhookSignature { system: self.system }.into());
        }

        Ok(true)
    }

    /// Extracts the signature from `header` and validates it against `payload`.
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<bool, SyncError> {
        let signature = self.extract_signature(header)?;
        self.validate_signature(payload, &signature)
    }
}

/// Lower-case hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|err| err.to_string())?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
