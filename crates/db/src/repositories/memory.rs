use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use bridgesync_core::domain::mapping::{EntityMapping, MappingKey, SyncRecord};
use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::SyncError;
use bridgesync_core::sync::EntityMappingStore;

use super::{EntityMappingRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryEntityMappingRepository {
    mappings: RwLock<HashMap<MappingKey, EntityMapping>>,
}

impl InMemoryEntityMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityMappingRepository for InMemoryEntityMappingRepository {
    async fn find_by_key(&self, key: &MappingKey) -> Result<Option<EntityMapping>, RepositoryError> {
        let mappings = self.mappings.read().await;
        Ok(mappings.get(key).cloned())
    }

    async fn find_by_counterpart(
        &self,
        entity_type: &str,
        counterpart_id: &str,
        system_type: SystemType,
    ) -> Result<Option<EntityMapping>, RepositoryError> {
        let mappings = self.mappings.read().await;
        Ok(mappings
            .values()
            .filter(|mapping| {
                mapping.entity_type == entity_type
                    && mapping.system_type == system_type
                    && mapping.counterpart_id.as_deref() == Some(counterpart_id)
            })
            .max_by_key(|mapping| mapping.last_sync_at)
            .cloned())
    }

    async fn record_sync(&self, record: SyncRecord) -> Result<EntityMapping, RepositoryError> {
        let mut mappings = self.mappings.write().await;
        let mapping = record.apply(mappings.get(&record.key).cloned());
        mappings.insert(record.key.clone(), mapping.clone());
        Ok(mapping)
    }

    async fn list_for_entity_type(
        &self,
        entity_type: &str,
    ) -> Result<Vec<EntityMapping>, RepositoryError> {
        let mappings = self.mappings.read().await;
        let mut listed: Vec<EntityMapping> = mappings
            .values()
            .filter(|mapping| mapping.entity_type == entity_type)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            (left.entity_id.as_str(), left.system_type.as_str())
                .cmp(&(right.entity_id.as_str(), right.system_type.as_str()))
        });
        Ok(listed)
    }
}

#[async_trait]
impl EntityMappingStore for InMemoryEntityMappingRepository {
    async fn find_mapping(&self, key: &MappingKey) -> Result<Option<EntityMapping>, SyncError> {
        Ok(self.find_by_key(key).await?)
    }
}
