use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::domain::system::SystemType;

pub const REASON_CRM_WINS: &str = "CRM priority - CRM always wins conflicts";
pub const REASON_FINANCE_BLOCKED: &str = "CRM priority - Finance changes don't override CRM";
pub const REASON_NO_CONFLICT: &str = "No conflict detected";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Source,
    Target,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDecision {
    pub should_sync: bool,
    pub winner: Winner,
    pub reason: &'static str,
}

/// Absolute-priority conflict policy: CRM outranks Finance regardless of timestamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(&self, source: SystemType, target: SystemType) -> SyncDecision {
        match (source, target) {
            (SystemType::Crm, _) => {
                SyncDecision { should_sync: true, winner: Winner::Source, reason: REASON_CRM_WINS }
            }
            (SystemType::Finance, SystemType::Crm) => SyncDecision {
                should_sync: false,
                winner: Winner::Target,
                reason: REASON_FINANCE_BLOCKED,
            },
            _ => SyncDecision {
                should_sync: true,
                winner: Winner::Source,
                reason: REASON_NO_CONFLICT,
            },
        }
    }

    /// Debounce for periodic resyncs; independent of the priority decision.
    pub fn should_sync_based_on_time(
        &self,
        last_sync_at: DateTime<Utc>,
        min_interval_minutes: u64,
    ) -> bool {
        self.should_sync_based_on_time_at(last_sync_at, min_interval_minutes, Utc::now())
    }

    /// Applies the configured `sync.min_resync_interval_minutes` to a mapping's last sync.
    pub fn should_resync(&self, sync: &SyncConfig, last_sync_at: DateTime<Utc>) -> bool {
        self.should_resync_at(sync, last_sync_at, Utc::now())
    }

    pub fn should_resync_at(
        &self,
        sync: &SyncConfig,
        last_sync_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.should_sync_based_on_time_at(last_sync_at, sync.min_resync_interval_minutes, now)
    }

    pub fn should_sync_based_on_time_at(
        &self,
        last_sync_at: DateTime<Utc>,
        min_interval_minutes: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(interval) = i64::try_from(min_interval_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60_000))
            .and_then(Duration::try_milliseconds)
        else {
            return false;
        };
        (now - last_sync_at) >= interval
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ConflictResolver, Winner, REASON_CRM_WINS, REASON_NO_CONFLICT};
    use crate::config::AppConfig;
    use crate::domain::system::SystemType;

    #[test]
    fn crm_source_always_wins() {
        let resolver = ConflictResolver::new();

        for target in [SystemType::Crm, SystemType::Finance] {
            let decision = resolver.decide(SystemType::Crm, target);
            assert!(decision.should_sync);
            assert_eq!(decision.winner, Winner::Source);
            assert_eq!(decision.reason, REASON_CRM_WINS);
        }
    }

    #[test]
    fn finance_never_overrides_crm() {
        let decision = ConflictResolver::new().decide(SystemType::Finance, SystemType::Crm);

        assert!(!decision.should_sync);
        assert_eq!(decision.winner, Winner::Target);
        assert!(decision.reason.contains("don't override CRM"));
    }

    #[test]
    fn finance_to_finance_is_not_a_conflict() {
        let decision = ConflictResolver::new().decide(SystemType::Finance, SystemType::Finance);

        assert!(decision.should_sync);
        assert_eq!(decision.winner, Winner::Source);
        assert_eq!(decision.reason, REASON_NO_CONFLICT);
    }

    #[test]
    fn time_debounce_uses_inclusive_interval() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();

        assert!(resolver.should_sync_based_on_time_at(now - Duration::minutes(5), 5, now));
        assert!(!resolver.should_sync_based_on_time_at(
            now - Duration::minutes(5) + Duration::milliseconds(1),
            5,
            now
        ));
        assert!(resolver.should_sync_based_on_time_at(now, 0, now));
    }

    #[test]
    fn configured_resync_interval_changes_the_outcome() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let last_sync_at = now - Duration::minutes(10);
        let mut sync = AppConfig::default().sync;

        sync.min_resync_interval_minutes = 5;
        assert!(resolver.should_resync_at(&sync, last_sync_at, now));

        sync.min_resync_interval_minutes = 15;
        assert!(!resolver.should_resync_at(&sync, last_sync_at, now));
    }

    #[test]
    fn time_debounce_never_fires_for_unbounded_interval() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();

        assert!(!resolver.should_sync_based_on_time_at(now - Duration::days(3650), u64::MAX, now));
    }
}
