//! Per-system session caching with single-flight refresh.
//!
//! A [`SessionCache`] owns the credential for exactly one upstream system.
//! Callers ask for a token; the cache either hands back the stored one or
//! authenticates. Concurrent callers that find no usable credential share a
//! single in-flight authentication, so a burst of webhooks triggers one login.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::Mutex;
use tracing::{info, warn};

use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::{AuthenticationError, SyncError};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    pub fiscal_year: Option<String>,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            refresh_token: None,
            expires_at: None,
            issued_at,
            fiscal_year: None,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .field("fiscal_year", &self.fiscal_year)
            .finish()
    }
}

/// How a token is presented in the `Authorization` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    RawSession,
}

impl AuthScheme {
    pub fn header_value(&self, token: &str) -> String {
        match self {
            Self::Bearer => format!("Bearer {token}"),
            Self::RawSession => token.to_string(),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    fn system(&self) -> SystemType;

    fn scheme(&self) -> AuthScheme;

    /// Performs a full login against the upstream.
    async fn authenticate(&self) -> Result<SessionCredential, SyncError>;

    /// Cheap authenticated call proving the credential is still accepted.
    async fn probe(&self, credential: &SessionCredential) -> Result<(), SyncError>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<SessionCredential, SyncError>>>;

#[derive(Default)]
struct CacheState {
    credential: Option<SessionCredential>,
    in_flight: Option<(u64, RefreshFuture)>,
    refresh_seq: u64,
}

pub struct SessionCache<A> {
    authenticator: Arc<A>,
    state: Mutex<CacheState>,
    probe_timeout: Duration,
}

impl<A: Authenticator> SessionCache<A> {
    pub fn new(authenticator: A) -> Self {
        Self::with_probe_timeout(authenticator, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(authenticator: A, probe_timeout: Duration) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            state: Mutex::new(CacheState::default()),
            probe_timeout,
        }
    }

    pub fn system(&self) -> SystemType {
        self.authenticator.system()
    }

    pub async fn get_token(&self) -> Result<String, SyncError> {
        Ok(self.credential_at(Utc::now()).await?.token)
    }

    pub async fn get_token_at(&self, now: DateTime<Utc>) -> Result<String, SyncError> {
        Ok(self.credential_at(now).await?.token)
    }

    pub async fn get_auth_headers(&self) -> Result<HeaderMap, SyncError> {
        let token = self.get_token().await?;
        let system = self.system();
        let rendered = self.authenticator.scheme().header_value(&token);
        let mut authorization =
            HeaderValue::from_str(&rendered).map_err(|_| AuthenticationError::Failed {
                system,
                message: "token contains characters that are not valid in a header".to_string(),
            })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Obtains a token and probes the upstream with it. Any failure clears the cache.
    pub async fn validate(&self) -> bool {
        let system = self.system();
        let credential = match self.credential_at(Utc::now()).await {
            Ok(credential) => credential,
            Err(error) => {
                warn!(
                    event_name = "session.validate.auth_failed",
                    system = %system,
                    error_class = error.error_class(),
                    error = %error,
                    "session validation could not obtain a credential"
                );
                self.invalidate().await;
                return false;
            }
        };

        let outcome =
            tokio::time::timeout(self.probe_timeout, self.authenticator.probe(&credential)).await;
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(
                    event_name = "session.validate.probe_rejected",
                    system = %system,
                    error = %error,
                    "upstream rejected the cached session"
                );
                self.invalidate().await;
                false
            }
            Err(_) => {
                warn!(
                    event_name = "session.validate.probe_timeout",
                    system = %system,
                    timeout_ms = u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX),
                    "session probe timed out"
                );
                self.invalidate().await;
                false
            }
        }
    }

    /// Drops the cached credential. A refresh already in flight still resolves
    /// for its waiters but its result is not stored.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.credential = None;
        state.in_flight = None;
        info!(
            event_name = "session.invalidated",
            system = %self.system(),
            "cached session cleared"
        );
    }

    pub async fn cached_credential(&self) -> Option<SessionCredential> {
        self.state.lock().await.credential.clone()
    }

    async fn credential_at(&self, now: DateTime<Utc>) -> Result<SessionCredential, SyncError> {
        let (refresh_id, refresh) = {
            let mut state = self.state.lock().await;
            if let Some(credential) =
                state.credential.as_ref().filter(|credential| credential.is_valid_at(now))
            {
                return Ok(credential.clone());
            }

            let joined = state.in_flight.as_ref().map(|(id, refresh)| (*id, refresh.clone()));
            match joined {
                Some(in_flight) => in_flight,
                None => {
                    state.credential = None;
                    state.refresh_seq += 1;
                    let refresh_id = state.refresh_seq;
                    let refresh =
                        authenticate_once(Arc::clone(&self.authenticator)).boxed().shared();
                    state.in_flight = Some((refresh_id, refresh.clone()));
                    (refresh_id, refresh)
                }
            }
        };

        let result = refresh.await;

        let mut state = self.state.lock().await;
        let still_current =
            matches!(&state.in_flight, Some((current, _)) if *current == refresh_id);
        if still_current {
            state.in_flight = None;
            state.credential = result.as_ref().ok().cloned();
        }
        result
    }
}

async fn authenticate_once<A: Authenticator>(
    authenticator: Arc<A>,
) -> Result<SessionCredential, SyncError> {
    let system = authenticator.system();
    match authenticator.authenticate().await {
        Ok(credential) if credential.token.is_empty() => {
            warn!(
                event_name = "session.refresh.missing_token",
                system = %system,
                "authentication succeeded without a usable token"
            );
            Err(AuthenticationError::MissingToken { system }.into())
        }
        Ok(credential) => {
            info!(
                event_name = "session.refresh.succeeded",
                system = %system,
                expires_at = ?credential.expires_at,
                "authenticated with upstream"
            );
            Ok(credential)
        }
        Err(error) => {
            warn!(
                event_name = "session.refresh.failed",
                system = %system,
                error_class = error.error_class(),
                retryable = error.is_retryable(),
                error = %error,
                "authentication with upstream failed"
            );
            Err(error)
        }
    }
}
