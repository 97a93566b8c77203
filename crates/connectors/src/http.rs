use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::{AuthenticationError, SyncError};

const MAX_UPSTREAM_MESSAGE_CHARS: usize = 200;

pub(crate) fn build_client(system: SystemType, timeout: Duration) -> Result<Client, SyncError> {
    Client::builder().timeout(timeout).build().map_err(|error| {
        SyncError::Configuration(format!("could not build {system} http client: {error}"))
    })
}

/// Joins the configured base URL and a path, failing when the base URL is unset.
pub(crate) fn endpoint(
    system: SystemType,
    base_url: Option<&str>,
    path: &str,
) -> Result<String, SyncError> {
    let base_url = base_url
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SyncError::Configuration(format!("{system}.base_url is not configured")))?;

    Ok(format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/')))
}

pub(crate) fn transport_error(system: SystemType, error: reqwest::Error) -> SyncError {
    if error.is_timeout() || error.is_connect() {
        return SyncError::TransientUpstream { system, message: error.to_string() };
    }
    AuthenticationError::Failed { system, message: format!("request failed: {error}") }.into()
}

/// Maps a non-success status shared by both upstreams. 401 and 403 are
/// authentication outcomes; 5xx is transient.
pub(crate) fn status_error(system: SystemType, status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => {
            AuthenticationError::InvalidCredentials { system, message }.into()
        }
        StatusCode::FORBIDDEN => AuthenticationError::RateLimited { system, message }.into(),
        status if status.is_server_error() => SyncError::TransientUpstream {
            system,
            message: format!("{} {message}", status.as_u16()),
        },
        status => AuthenticationError::Failed {
            system,
            message: format!("unexpected status {}: {message}", status.as_u16()),
        }
        .into(),
    }
}

/// Best-effort human message from an error response body.
pub(crate) async fn upstream_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    message_from_body(status, &body)
}

fn message_from_body(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        let field = ["message", "Message", "error_description", "error", "Error"]
            .into_iter()
            .find_map(|key| fields.get(key).and_then(Value::as_str));
        if let Some(message) = field {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.canonical_reason().unwrap_or("no response body").to_string();
    }
    trimmed.chars().take(MAX_UPSTREAM_MESSAGE_CHARS).collect()
}
