use async_trait::async_trait;
use thiserror::Error;

use bridgesync_core::domain::mapping::{EntityMapping, MappingKey, SyncRecord};
use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::SyncError;

pub mod entity_mapping;
pub mod memory;

pub use entity_mapping::SqlEntityMappingRepository;
pub use memory::InMemoryEntityMappingRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for SyncError {
    fn from(error: RepositoryError) -> Self {
        SyncError::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait EntityMappingRepository: Send + Sync {
    async fn find_by_key(&self, key: &MappingKey) -> Result<Option<EntityMapping>, RepositoryError>;

    /// Resolves the mapping whose `counterpart_id` points at `counterpart_id`
    /// for the given entity type, seen from `system_type`.
    async fn find_by_counterpart(
        &self,
        entity_type: &str,
        counterpart_id: &str,
        system_type: SystemType,
    ) -> Result<Option<EntityMapping>, RepositoryError>;

    /// Folds a completed sync into the mapping for `record.key`, creating it on first sync.
    async fn record_sync(&self, record: SyncRecord) -> Result<EntityMapping, RepositoryError>;

    async fn list_for_entity_type(
        &self,
        entity_type: &str,
    ) -> Result<Vec<EntityMapping>, RepositoryError>;
}
