use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::system::SystemType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityMappingId(pub String);

impl EntityMappingId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Lookup key for an [`EntityMapping`]. At most one mapping exists per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    pub entity_type: String,
    pub entity_id: String,
    pub system_type: SystemType,
}

impl MappingKey {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        system_type: SystemType,
    ) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into(), system_type }
    }
}

impl std::fmt::Display for MappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.entity_type, self.entity_id, self.system_type)
    }
}

/// Cross-system identity and last-sync state for one logical entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub id: EntityMappingId,
    pub entity_type: String,
    pub entity_id: String,
    pub system_type: SystemType,
    pub counterpart_id: Option<String>,
    pub last_sync_at: DateTime<Utc>,
    pub last_sync_transaction_id: Option<String>,
    pub crm_checksum: Option<String>,
    pub finance_checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityMapping {
    pub fn key(&self) -> MappingKey {
        MappingKey::new(self.entity_type.clone(), self.entity_id.clone(), self.system_type)
    }

    pub fn checksum_for(&self, system: SystemType) -> Option<&str> {
        match system {
            SystemType::Crm => self.crm_checksum.as_deref(),
            SystemType::Finance => self.finance_checksum.as_deref(),
        }
    }
}

/// Outcome of a successful remote write, applied to the mapping by the writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncRecord {
    pub key: MappingKey,
    pub counterpart_id: Option<String>,
    pub transaction_id: String,
    pub checksum: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Builds the mapping a first sync creates, or folds this record into an existing one.
    pub fn apply(&self, existing: Option<EntityMapping>) -> EntityMapping {
        let mut mapping = existing.unwrap_or_else(|| EntityMapping {
            id: EntityMappingId::generate(),
            entity_type: self.key.entity_type.clone(),
            entity_id: self.key.entity_id.clone(),
            system_type: self.key.system_type,
            counterpart_id: None,
            last_sync_at: self.synced_at,
            last_sync_transaction_id: None,
            crm_checksum: None,
            finance_checksum: None,
            created_at: self.synced_at,
            updated_at: self.synced_at,
        });

        if self.counterpart_id.is_some() {
            mapping.counterpart_id = self.counterpart_id.clone();
        }
        if let Some(checksum) = &self.checksum {
            match self.key.system_type {
                SystemType::Crm => mapping.crm_checksum = Some(checksum.clone()),
                SystemType::Finance => mapping.finance_checksum = Some(checksum.clone()),
            }
        }
        mapping.last_sync_at = self.synced_at;
        mapping.last_sync_transaction_id = Some(self.transaction_id.clone());
        mapping.updated_at = self.synced_at;
        mapping
    }
}
