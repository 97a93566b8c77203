use bridgesync_core::config::{AppConfig, LoadOptions};
use bridgesync_core::{ConflictResolver, EntityMapping, SystemType};
use bridgesync_db::{connect_from_config, EntityMappingRepository, SqlEntityMappingRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Debug, Serialize)]
struct MappingRow {
    entity_id: String,
    system_type: SystemType,
    counterpart_id: Option<String>,
    last_sync_at: String,
    last_sync_transaction_id: Option<String>,
    due_for_resync: bool,
}

#[derive(Debug, Serialize)]
struct MappingsReport<'a> {
    command: &'static str,
    status: &'static str,
    entity_type: &'a str,
    min_resync_interval_minutes: u64,
    due_for_resync: usize,
    mappings: Vec<MappingRow>,
}

/// Lists stored mappings of `entity_type` and flags the ones past the resync interval.
///
/// With `counterpart`, resolves the single mapping pointing at that id from `system`.
pub fn run(entity_type: &str, counterpart: Option<&str>, system: Option<&str>) -> CommandResult {
    let system = match system.map(|raw| SystemType::parse(raw).ok_or(raw)).transpose() {
        Ok(system) => system,
        Err(raw) => {
            return CommandResult::failure(
                "mappings",
                "invalid_argument",
                format!("unknown system `{raw}`; expected crm or finance"),
                2,
            );
        }
    };
    if counterpart.is_some() && system.is_none() {
        return CommandResult::failure(
            "mappings",
            "invalid_argument",
            "--counterpart requires --system",
            2,
        );
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "mappings",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "mappings",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let repo = SqlEntityMappingRepository::new(pool.clone());

        let fetched: Result<Vec<EntityMapping>, _> = match (counterpart, system) {
            (Some(counterpart_id), Some(system)) => repo
                .find_by_counterpart(entity_type, counterpart_id, system)
                .await
                .map(|found| found.into_iter().collect::<Vec<_>>()),
            _ => repo.list_for_entity_type(entity_type).await.map(|listed| {
                listed
                    .into_iter()
                    .filter(|mapping| system.map_or(true, |system| mapping.system_type == system))
                    .collect()
            }),
        };
        pool.close().await;
        fetched.map_err(|error| ("query", error.to_string(), 5u8))
    });

    match result {
        Ok(mappings) => render_report(entity_type, &config, mappings, Utc::now()),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("mappings", error_class, message, exit_code)
        }
    }
}

fn render_report(
    entity_type: &str,
    config: &AppConfig,
    mappings: Vec<EntityMapping>,
    now: DateTime<Utc>,
) -> CommandResult {
    let resolver = ConflictResolver::new();
    let rows: Vec<MappingRow> = mappings
        .into_iter()
        .map(|mapping| MappingRow {
            due_for_resync: resolver.should_resync_at(&config.sync, mapping.last_sync_at, now),
            last_sync_at: mapping.last_sync_at.to_rfc3339(),
            entity_id: mapping.entity_id,
            system_type: mapping.system_type,
            counterpart_id: mapping.counterpart_id,
            last_sync_transaction_id: mapping.last_sync_transaction_id,
        })
        .collect();

    let report = MappingsReport {
        command: "mappings",
        status: "ok",
        entity_type,
        min_resync_interval_minutes: config.sync.min_resync_interval_minutes,
        due_for_resync: rows.iter().filter(|row| row.due_for_resync).count(),
        mappings: rows,
    };

    match serde_json::to_string(&report) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("mappings", "serialization", error.to_string(), 1),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use bridgesync_core::config::AppConfig;
    use bridgesync_core::domain::mapping::{MappingKey, SyncRecord};
    use bridgesync_core::SystemType;
    use serde_json::Value;

    use super::render_report;

    #[test]
    fn report_flags_mappings_older_than_configured_interval() {
        let now = Utc::now();
        let mut config = AppConfig::default();
        config.sync.min_resync_interval_minutes = 30;
        let mappings = [("stale", 45), ("fresh", 10)]
            .into_iter()
            .map(|(entity_id, minutes_ago)| {
                SyncRecord {
                    key: MappingKey::new("Contact", entity_id, SystemType::Crm),
                    counterpart_id: None,
                    transaction_id: format!("tx-{entity_id}"),
                    checksum: None,
                    synced_at: now - Duration::minutes(minutes_ago),
                }
                .apply(None)
            })
            .collect();

        let result = render_report("Contact", &config, mappings, now);
        let report: Value = serde_json::from_str(&result.output).expect("report is JSON");

        assert_eq!(result.exit_code, 0);
        assert_eq!(report["min_resync_interval_minutes"], 30);
        assert_eq!(report["due_for_resync"], 1);
        assert_eq!(report["mappings"][0]["entity_id"], "stale");
        assert_eq!(report["mappings"][0]["due_for_resync"], true);
        assert_eq!(report["mappings"][1]["due_for_resync"], false);
    }
}
