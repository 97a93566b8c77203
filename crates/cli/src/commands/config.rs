use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bridgesync_core::config::{AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

struct ConfigField {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl ConfigField {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<ConfigField> {
    vec![
        ConfigField::new("database.url", Some("BRIDGESYNC_DATABASE_URL"), &config.database.url),
        ConfigField::new(
            "database.max_connections",
            Some("BRIDGESYNC_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections.to_string(),
        ),
        ConfigField::new(
            "database.timeout_secs",
            Some("BRIDGESYNC_DATABASE_TIMEOUT_SECS"),
            config.database.timeout_secs.to_string(),
        ),
        ConfigField::new(
            "server.bind_address",
            Some("BRIDGESYNC_SERVER_BIND_ADDRESS"),
            &config.server.bind_address,
        ),
        ConfigField::new(
            "server.port",
            Some("BRIDGESYNC_SERVER_PORT"),
            config.server.port.to_string(),
        ),
        ConfigField::new(
            "crm.base_url",
            Some("BRIDGESYNC_CRM_BASE_URL"),
            unset_or(config.crm.base_url.as_deref()),
        ),
        ConfigField::new(
            "crm.username",
            Some("BRIDGESYNC_CRM_USERNAME"),
            unset_or(config.crm.username.as_deref()),
        ),
        ConfigField::new(
            "crm.password",
            Some("BRIDGESYNC_CRM_PASSWORD"),
            redact(config.crm.password.as_ref()),
        ),
        ConfigField::new("crm.device_id", Some("BRIDGESYNC_CRM_DEVICE_ID"), &config.crm.device_id),
        ConfigField::new(
            "crm.webhook_secret",
            Some("BRIDGESYNC_CRM_WEBHOOK_SECRET"),
            redact(config.crm.webhook_secret.as_ref()),
        ),
        ConfigField::new(
            "finance.base_url",
            Some("BRIDGESYNC_FINANCE_BASE_URL"),
            unset_or(config.finance.base_url.as_deref()),
        ),
        ConfigField::new(
            "finance.username",
            Some("BRIDGESYNC_FINANCE_USERNAME"),
            unset_or(config.finance.username.as_deref()),
        ),
        ConfigField::new(
            "finance.password",
            Some("BRIDGESYNC_FINANCE_PASSWORD"),
            redact(config.finance.password.as_ref()),
        ),
        ConfigField::new(
            "finance.webhook_secret",
            Some("BRIDGESYNC_FINANCE_WEBHOOK_SECRET"),
            redact(config.finance.webhook_secret.as_ref()),
        ),
        ConfigField::new(
            "sync.loop_window_secs",
            Some("BRIDGESYNC_SYNC_LOOP_WINDOW_SECS"),
            config.sync.loop_window_secs.to_string(),
        ),
        ConfigField::new(
            "sync.min_resync_interval_minutes",
            Some("BRIDGESYNC_SYNC_MIN_RESYNC_INTERVAL_MINUTES"),
            config.sync.min_resync_interval_minutes.to_string(),
        ),
        ConfigField::new(
            "sync.webhook_mode",
            Some("BRIDGESYNC_SYNC_WEBHOOK_MODE"),
            format!("{:?}", config.sync.webhook_mode),
        ),
        ConfigField::new("logging.level", Some("BRIDGESYNC_LOGGING_LEVEL"), &config.logging.level),
        ConfigField::new(
            "logging.format",
            Some("BRIDGESYNC_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("bridgesync.toml"), PathBuf::from("config/bridgesync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset_or(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}
