use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use bridgesync_core::domain::mapping::{EntityMapping, EntityMappingId, MappingKey, SyncRecord};
use bridgesync_core::domain::system::SystemType;
use bridgesync_core::errors::SyncError;
use bridgesync_core::sync::EntityMappingStore;

use super::{EntityMappingRepository, RepositoryError};
use crate::DbPool;

const MAPPING_COLUMNS: &str = "id,
    entity_type,
    entity_id,
    system_type,
    counterpart_id,
    last_sync_at,
    last_sync_transaction_id,
    crm_checksum,
    finance_checksum,
    created_at,
    updated_at";

const UPSERT_MAPPING_SQL: &str = "INSERT INTO entity_mapping (
        id,
        entity_type,
        entity_id,
        system_type,
        counterpart_id,
        last_sync_at,
        last_sync_transaction_id,
        crm_checksum,
        finance_checksum,
        created_at,
        updated_at
     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(entity_type, entity_id, system_type) DO UPDATE SET
        counterpart_id = excluded.counterpart_id,
        last_sync_at = excluded.last_sync_at,
        last_sync_transaction_id = excluded.last_sync_transaction_id,
        crm_checksum = excluded.crm_checksum,
        finance_checksum = excluded.finance_checksum,
        updated_at = excluded.updated_at";

pub struct SqlEntityMappingRepository {
    pool: DbPool,
}

impl SqlEntityMappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityMappingRepository for SqlEntityMappingRepository {
    async fn find_by_key(&self, key: &MappingKey) -> Result<Option<EntityMapping>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS}
             FROM entity_mapping
             WHERE entity_type = ? AND entity_id = ? AND system_type = ?"
        ))
        .bind(&key.entity_type)
        .bind(&key.entity_id)
        .bind(key.system_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(mapping_from_row).transpose()
    }

    async fn find_by_counterpart(
        &self,
        entity_type: &str,
        counterpart_id: &str,
        system_type: SystemType,
    ) -> Result<Option<EntityMapping>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS}
             FROM entity_mapping
             WHERE entity_type = ? AND counterpart_id = ? AND system_type = ?
             ORDER BY last_sync_at DESC
             LIMIT 1"
        ))
        .bind(entity_type)
        .bind(counterpart_id)
        .bind(system_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(mapping_from_row).transpose()
    }

    async fn record_sync(&self, record: SyncRecord) -> Result<EntityMapping, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS}
             FROM entity_mapping
             WHERE entity_type = ? AND entity_id = ? AND system_type = ?"
        ))
        .bind(&record.key.entity_type)
        .bind(&record.key.entity_id)
        .bind(record.key.system_type.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(mapping_from_row)
        .transpose()?;

        let mapping = record.apply(existing);
        bind_mapping(sqlx::query(UPSERT_MAPPING_SQL), &mapping).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(mapping)
    }

    async fn list_for_entity_type(
        &self,
        entity_type: &str,
    ) -> Result<Vec<EntityMapping>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS}
             FROM entity_mapping
             WHERE entity_type = ?
             ORDER BY entity_id ASC, system_type ASC"
        ))
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(mapping_from_row).collect()
    }
}

#[async_trait]
impl EntityMappingStore for SqlEntityMappingRepository {
    async fn find_mapping(&self, key: &MappingKey) -> Result<Option<EntityMapping>, SyncError> {
        Ok(self.find_by_key(key).await?)
    }
}

fn bind_mapping<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    mapping: &'q EntityMapping,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&mapping.id.0)
        .bind(&mapping.entity_type)
        .bind(&mapping.entity_id)
        .bind(mapping.system_type.as_str())
        .bind(mapping.counterpart_id.as_deref())
        .bind(mapping.last_sync_at.to_rfc3339())
        .bind(mapping.last_sync_transaction_id.as_deref())
        .bind(mapping.crm_checksum.as_deref())
        .bind(mapping.finance_checksum.as_deref())
        .bind(mapping.created_at.to_rfc3339())
        .bind(mapping.updated_at.to_rfc3339())
}

fn mapping_from_row(row: SqliteRow) -> Result<EntityMapping, RepositoryError> {
    let system_raw = row.try_get::<String, _>("system_type")?;
    let system_type = SystemType::parse(&system_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown system type `{system_raw}`")))?;

    Ok(EntityMapping {
        id: EntityMappingId(row.try_get("id")?),
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        system_type,
        counterpart_id: row.try_get("counterpart_id")?,
        last_sync_at: parse_timestamp("last_sync_at", row.try_get("last_sync_at")?)?,
        last_sync_transaction_id: row.try_get("last_sync_transaction_id")?,
        crm_checksum: row.try_get("crm_checksum")?,
        finance_checksum: row.try_get("finance_checksum")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
