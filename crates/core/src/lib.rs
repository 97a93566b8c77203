pub mod config;
pub mod domain;
pub mod errors;
pub mod sync;
pub mod webhook;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, WebhookSecurityMode};
pub use domain::mapping::{EntityMapping, EntityMappingId, MappingKey, SyncRecord};
pub use domain::system::SystemType;
pub use errors::{AuthenticationError, InterfaceError, SyncError};
pub use sync::{
    payload_checksum, ConflictResolver, EntityMappingStore, LoopDetector, SyncDecision, Winner,
};
pub use webhook::{sign_payload, WebhookSignatureValidator};
