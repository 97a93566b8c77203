use bridgesync_core::config::{AppConfig, LoadOptions, WebhookSecurityMode};
use bridgesync_core::SystemType;
use bridgesync_db::{connect_from_config, ping};
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["database_connectivity", "crm_credentials", "finance_credentials", "webhook_secrets"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_database_connectivity(&config));
            checks.push(check_credentials(&config, SystemType::Crm));
            checks.push(check_credentials(&config, SystemType::Finance));
            checks.push(check_webhook_secrets(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Presence only; no login is attempted.
fn check_credentials(config: &AppConfig, system: SystemType) -> DoctorCheck {
    let (name, base_url, username, has_password) = match system {
        SystemType::Crm => (
            "crm_credentials",
            config.crm.base_url.as_deref(),
            config.crm.username.as_deref(),
            config.crm.password.is_some(),
        ),
        SystemType::Finance => (
            "finance_credentials",
            config.finance.base_url.as_deref(),
            config.finance.username.as_deref(),
            config.finance.password.is_some(),
        ),
    };

    let mut missing = Vec::new();
    if base_url.map_or(true, |value| value.trim().is_empty()) {
        missing.push(format!("{system}.base_url"));
    }
    if username.map_or(true, |value| value.trim().is_empty()) {
        missing.push(format!("{system}.username"));
    }
    if !has_password {
        missing.push(format!("{system}.password"));
    }

    if missing.is_empty() {
        DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: format!("{system} base_url, username and password are set"),
        }
    } else {
        DoctorCheck {
            name,
            status: CheckStatus::Fail,
            details: format!("missing {}", missing.join(", ")),
        }
    }
}

fn check_webhook_secrets(config: &AppConfig) -> DoctorCheck {
    let missing: Vec<&str> = [SystemType::Crm, SystemType::Finance]
        .into_iter()
        .filter(|system| config.webhook_secret(*system).is_none())
        .map(|system| system.as_str())
        .collect();

    if missing.is_empty() {
        return DoctorCheck {
            name: "webhook_secrets",
            status: CheckStatus::Pass,
            details: "webhook secrets configured for crm and finance".to_string(),
        };
    }

    let consequence = match config.sync.webhook_mode {
        WebhookSecurityMode::FailOpen => "unsigned webhooks will be accepted",
        WebhookSecurityMode::FailClosed => "webhooks will be rejected",
    };
    DoctorCheck {
        name: "webhook_secrets",
        status: CheckStatus::Fail,
        details: format!("no webhook secret for {}; {consequence}", missing.join(", ")),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let pinged = ping(&pool).await.map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        pinged
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
