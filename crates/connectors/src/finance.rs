//! Finance (Siagh) login. The upstream expects the password as an upper-case
//! MD5 hex digest and answers with a session id that never expires on its own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::{header::AUTHORIZATION, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bridgesync_core::config::{FinanceConfig, SyncConfig};
use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::{AuthenticationError, SyncError};

use crate::http::{build_client, endpoint, status_error, transport_error, upstream_message};
use crate::session::{AuthScheme, Authenticator, SessionCredential};

pub struct FinanceAuthenticator {
    client: Client,
    config: FinanceConfig,
    probe_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FinanceLoginRequest<'a> {
    user_name: &'a str,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FinanceLoginResponse {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    fiscal_year: Option<Value>,
}

pub fn hash_password(password: &str) -> String {
    hex::encode_upper(Md5::digest(password.as_bytes()))
}

impl FinanceAuthenticator {
    pub fn new(config: FinanceConfig, sync: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(SystemType::Finance, sync.auth_timeout())?,
            config,
            probe_timeout: sync.probe_timeout(),
        })
    }
}

#[async_trait]
impl Authenticator for FinanceAuthenticator {
    fn system(&self) -> SystemType {
        SystemType::Finance
    }

    fn scheme(&self) -> AuthScheme {
        AuthScheme::RawSession
    }

    async fn authenticate(&self) -> Result<SessionCredential, SyncError> {
        let username = self.config.username.as_deref().filter(|value| !value.is_empty());
        let password = self.config.password.as_ref().map(|value| value.expose_secret());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(SyncError::Configuration(
                "finance.username and finance.password must be configured".to_string(),
            ));
        };

        let url = endpoint(
            SystemType::Finance,
            self.config.base_url.as_deref(),
            &self.config.login_path,
        )?;
        let body = FinanceLoginRequest { user_name: username, password: hash_password(password) };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(SystemType::Finance, error))?;

        let status = response.status();
        if !status.is_success() {
            let message = upstream_message(response).await;
            return Err(status_error(SystemType::Finance, status, message));
        }

        let payload: FinanceLoginResponse = response.json().await.map_err(|error| {
            AuthenticationError::Failed {
                system: SystemType::Finance,
                message: format!("could not decode login response: {error}"),
            }
        })?;

        Ok(SessionCredential {
            token: payload.session_id.unwrap_or_default(),
            refresh_token: payload.token.filter(|value| !value.is_empty()),
            expires_at: None,
            issued_at: Utc::now(),
            fiscal_year: payload.fiscal_year.as_ref().and_then(fiscal_year_label),
        })
    }

    async fn probe(&self, credential: &SessionCredential) -> Result<(), SyncError> {
        let url = endpoint(
            SystemType::Finance,
            self.config.base_url.as_deref(),
            &self.config.probe_path,
        )?;
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, AuthScheme::RawSession.header_value(&credential.token))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|error| transport_error(SystemType::Finance, error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = upstream_message(response).await;
        Err(status_error(SystemType::Finance, status, message))
    }
}

fn fiscal_year_label(value: &Value) -> Option<String> {
    match value {
        Value::String(label) if !label.trim().is_empty() => Some(label.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
