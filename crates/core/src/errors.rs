use thiserror::Error;

use crate::domain::system::SystemType;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("{system}: invalid credentials: {message}")]
    InvalidCredentials { system: SystemType, message: String },
    #[error("{system}: authentication rate limited, retry later: {message}")]
    RateLimited { system: SystemType, message: String },
    #[error("{system}: required module is unavailable: {message}")]
    ModuleUnavailable { system: SystemType, message: String },
    #[error("{system}: authentication succeeded but returned no usable token")]
    MissingToken { system: SystemType },
    #[error("{system}: missing webhook signature")]
    MissingWebhookSignature { system: SystemType },
    #[error("{system}: invalid webhook signature")]
    InvalidWebhookSignature { system: SystemType },
    #[error("{system}: authentication failed: {message}")]
    Failed { system: SystemType, message: String },
}

impl AuthenticationError {
    pub fn system(&self) -> SystemType {
        match self {
            Self::InvalidCredentials { system, .. }
            | Self::RateLimited { system, .. }
            | Self::ModuleUnavailable { system, .. }
            | Self::MissingToken { system }
            | Self::MissingWebhookSignature { system }
            | Self::InvalidWebhookSignature { system }
            | Self::Failed { system, .. } => *system,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error("transient upstream failure from {system}: {message}")]
    TransientUpstream { system: SystemType, message: String },
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl SyncError {
    /// Whether a caller may retry the failed operation after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientUpstream { .. }
                | Self::Authentication(AuthenticationError::RateLimited { .. })
        )
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::TransientUpstream { .. } => "transient_upstream",
            Self::Configuration(_) => "configuration",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "The request could not be authenticated.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<SyncError> for InterfaceError {
    fn from(value: SyncError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            SyncError::Authentication(
                error @ (AuthenticationError::MissingWebhookSignature { .. }
                | AuthenticationError::InvalidWebhookSignature { .. }),
            ) => Self::Unauthorized { message: error.to_string(), correlation_id },
            SyncError::Authentication(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id }
            }
            SyncError::TransientUpstream { system, message } => Self::ServiceUnavailable {
                message: format!("{system}: {message}"),
                correlation_id,
            },
            SyncError::Persistence(message) => Self::ServiceUnavailable { message, correlation_id },
            SyncError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
