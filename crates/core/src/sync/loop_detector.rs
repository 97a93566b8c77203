use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::mapping::{EntityMapping, MappingKey};
use crate::domain::system::SystemType;
use crate::errors::SyncError;

pub const DEFAULT_LOOP_WINDOW_SECS: i64 = 10;

/// Read access to persisted entity mappings.
#[async_trait]
pub trait EntityMappingStore: Send + Sync {
    async fn find_mapping(&self, key: &MappingKey) -> Result<Option<EntityMapping>, SyncError>;
}

#[async_trait]
impl<T: EntityMappingStore + ?Sized> EntityMappingStore for Arc<T> {
    async fn find_mapping(&self, key: &MappingKey) -> Result<Option<EntityMapping>, SyncError> {
        (**self).find_mapping(key).await
    }
}

/// Suppresses sync echoes and no-op resyncs using the stored mapping state.
///
/// The lookup and the writer's later update are not one transaction: two
/// deliveries racing for the same key can both pass `is_loop`.
pub struct LoopDetector<S> {
    store: S,
    window: Duration,
}

impl<S: EntityMappingStore> LoopDetector<S> {
    pub fn new(store: S) -> Self {
        Self { store, window: Duration::seconds(DEFAULT_LOOP_WINDOW_SECS) }
    }

    pub fn with_window(store: S, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn is_loop(
        &self,
        entity_type: &str,
        entity_id: &str,
        system_type: SystemType,
        transaction_id: &str,
    ) -> Result<bool, SyncError> {
        self.is_loop_at(entity_type, entity_id, system_type, transaction_id, Utc::now()).await
    }

    pub async fn is_loop_at(
        &self,
        entity_type: &str,
        entity_id: &str,
        system_type: SystemType,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        let key = MappingKey::new(entity_type, entity_id, system_type);
        let Some(mapping) = self.store.find_mapping(&key).await? else {
            debug!(
                event_name = "sync.loop.first_sync",
                mapping_key = %key,
                "no mapping found, treating as first-time sync"
            );
            return Ok(false);
        };

        if mapping.last_sync_transaction_id.as_deref() == Some(transaction_id) {
            debug!(
                event_name = "sync.loop.transaction_echo",
                mapping_key = %key,
                transaction_id,
                "webhook echoes the transaction that produced the last sync"
            );
            return Ok(true);
        }

        let elapsed = now - mapping.last_sync_at;
        if elapsed < self.window {
            debug!(
                event_name = "sync.loop.cooldown",
                mapping_key = %key,
                elapsed_ms = elapsed.num_milliseconds(),
                window_ms = self.window.num_milliseconds(),
                "change arrived inside the loop cool-down window"
            );
            return Ok(true);
        }

        Ok(false)
    }

    pub async fn is_data_unchanged(
        &self,
        entity_type: &str,
        entity_id: &str,
        system_type: SystemType,
        new_checksum: &str,
    ) -> Result<bool, SyncError> {
        let key = MappingKey::new(entity_type, entity_id, system_type);
        let Some(mapping) = self.store.find_mapping(&key).await? else {
            return Ok(false);
        };

        let unchanged = mapping.checksum_for(system_type) == Some(new_checksum);
        if unchanged {
            debug!(
                event_name = "sync.loop.unchanged",
                mapping_key = %key,
                "payload checksum matches the last synced content"
            );
        }
        Ok(unchanged)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};

    use super::{EntityMappingStore, LoopDetector};
    use crate::domain::mapping::{EntityMapping, EntityMappingId, MappingKey};
    use crate::domain::system::SystemType;
    use crate::errors::SyncError;

    #[derive(Default)]
    struct FixtureStore {
        mappings: Mutex<HashMap<MappingKey, EntityMapping>>,
    }

    impl FixtureStore {
        fn with(mapping: EntityMapping) -> Self {
            let store = Self::default();
            store.mappings.lock().expect("fixture lock").insert(mapping.key(), mapping);
            store
        }
    }

    #[async_trait]
    impl EntityMappingStore for FixtureStore {
        async fn find_mapping(
            &self,
            key: &MappingKey,
        ) -> Result<Option<EntityMapping>, SyncError> {
            Ok(self.mappings.lock().expect("fixture lock").get(key).cloned())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl EntityMappingStore for FailingStore {
        async fn find_mapping(
            &self,
            _key: &MappingKey,
        ) -> Result<Option<EntityMapping>, SyncError> {
            Err(SyncError::Persistence("database is locked".to_string()))
        }
    }

    fn contact_mapping(last_sync_at: DateTime<Utc>, transaction_id: &str) -> EntityMapping {
        EntityMapping {
            id: EntityMappingId("map-1".to_string()),
            entity_type: "Contact".to_string(),
            entity_id: "42".to_string(),
            system_type: SystemType::Crm,
            counterpart_id: Some("fin-42".to_string()),
            last_sync_at,
            last_sync_transaction_id: Some(transaction_id.to_string()),
            crm_checksum: Some("crm-sum".to_string()),
            finance_checksum: Some("fin-sum".to_string()),
            created_at: last_sync_at,
            updated_at: last_sync_at,
        }
    }

    #[tokio::test]
    async fn missing_mapping_is_never_a_loop() {
        let detector = LoopDetector::new(FixtureStore::default());

        let looped =
            detector.is_loop("Contact", "42", SystemType::Crm, "tx-1").await.expect("is_loop");

        assert!(!looped);
    }

    #[tokio::test]
    async fn contact_echo_scenario_follows_transaction_and_cooldown() {
        let now = Utc::now();
        let mapping = contact_mapping(now - Duration::milliseconds(3000), "tx-1");
        let detector = LoopDetector::new(FixtureStore::with(mapping));

        assert!(detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-2", now)
            .await
            .expect("inside window"));
        assert!(detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-1", now)
            .await
            .expect("exact echo"));

        let later = now + Duration::seconds(8);
        assert!(!detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-3", later)
            .await
            .expect("after window"));
        assert!(detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-1", later)
            .await
            .expect("echo after window"));
    }

    #[tokio::test]
    async fn window_boundary_is_exclusive() {
        let now = Utc::now();
        let mapping = contact_mapping(now - Duration::seconds(10), "tx-1");
        let detector = LoopDetector::new(FixtureStore::with(mapping));

        let looped = detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-2", now)
            .await
            .expect("is_loop");

        assert!(!looped);
    }

    #[tokio::test]
    async fn configured_window_replaces_default() {
        let now = Utc::now();
        let detector = LoopDetector::with_window(
            FixtureStore::with(contact_mapping(now - Duration::seconds(20), "tx-1")),
            Duration::seconds(30),
        );

        assert!(detector
            .is_loop_at("Contact", "42", SystemType::Crm, "tx-2", now)
            .await
            .expect("is_loop"));
    }

    #[tokio::test]
    async fn lookups_are_scoped_to_the_full_key() {
        let now = Utc::now();
        let detector = LoopDetector::new(FixtureStore::with(contact_mapping(now, "tx-1")));

        assert!(!detector
            .is_loop_at("Contact", "42", SystemType::Finance, "tx-1", now)
            .await
            .expect("other system"));
        assert!(!detector
            .is_loop_at("Invoice", "42", SystemType::Crm, "tx-1", now)
            .await
            .expect("other entity type"));
    }

    #[tokio::test]
    async fn data_unchanged_compares_checksum_of_matching_system() {
        let mut mapping = contact_mapping(Utc::now(), "tx-1");
        mapping.system_type = SystemType::Finance;
        let detector = LoopDetector::new(FixtureStore::with(mapping));

        assert!(detector
            .is_data_unchanged("Contact", "42", SystemType::Finance, "fin-sum")
            .await
            .expect("finance checksum"));
        assert!(!detector
            .is_data_unchanged("Contact", "42", SystemType::Finance, "crm-sum")
            .await
            .expect("other side checksum"));
        assert!(!detector
            .is_data_unchanged("Contact", "42", SystemType::Crm, "crm-sum")
            .await
            .expect("missing mapping"));
    }

    #[tokio::test]
    async fn data_unchanged_is_false_without_stored_checksum() {
        let mut mapping = contact_mapping(Utc::now(), "tx-1");
        mapping.crm_checksum = None;
        let detector = LoopDetector::new(FixtureStore::with(mapping));

        assert!(!detector
            .is_data_unchanged("Contact", "42", SystemType::Crm, "crm-sum")
            .await
            .expect("is_data_unchanged"));
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let detector = LoopDetector::new(FailingStore);

        let error = detector
            .is_loop("Contact", "42", SystemType::Crm, "tx-1")
            .await
            .expect_err("store failure should surface");

        assert_eq!(error, SyncError::Persistence("database is locked".to_string()));
    }
}
