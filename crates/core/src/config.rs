use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::system::SystemType;

/// Upper bound for `sync.loop_window_secs` (one day).
pub const MAX_LOOP_WINDOW_SECS: u64 = 86_400;
/// Upper bound for `sync.min_resync_interval_minutes` (thirty days).
pub const MAX_RESYNC_INTERVAL_MINUTES: u64 = 43_200;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub finance: FinanceConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: Option<String>,
    pub login_path: String,
    pub probe_path: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub device_id: String,
    pub platform_type: String,
    pub os: String,
    pub os_version: String,
    pub device_token: String,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct FinanceConfig {
    pub base_url: Option<String>,
    pub login_path: String,
    pub probe_path: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub loop_window_secs: u64,
    pub auth_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub min_resync_interval_minutes: u64,
    pub webhook_mode: WebhookSecurityMode,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Behavior of webhook validation when no shared secret is configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSecurityMode {
    FailOpen,
    FailClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub crm_base_url: Option<String>,
    pub crm_username: Option<String>,
    pub crm_password: Option<String>,
    pub crm_webhook_secret: Option<String>,
    pub finance_base_url: Option<String>,
    pub finance_username: Option<String>,
    pub finance_password: Option<String>,
    pub finance_webhook_secret: Option<String>,
    pub loop_window_secs: Option<u64>,
    pub webhook_mode: Option<WebhookSecurityMode>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bridgesync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                base_url: None,
                login_path: "/api/v1/auth/login".to_string(),
                probe_path: "/api/v1/auth/me".to_string(),
                username: None,
                password: None,
                device_id: "bridgesync".to_string(),
                platform_type: "web".to_string(),
                os: "linux".to_string(),
                os_version: "1".to_string(),
                device_token: String::new(),
                webhook_secret: None,
            },
            finance: FinanceConfig {
                base_url: None,
                login_path: "/api/Users/Login".to_string(),
                probe_path: "/api/Users/Ping".to_string(),
                username: None,
                password: None,
                webhook_secret: None,
            },
            sync: SyncConfig {
                loop_window_secs: 10,
                auth_timeout_secs: 30,
                probe_timeout_secs: 5,
                min_resync_interval_minutes: 5,
                webhook_mode: WebhookSecurityMode::FailOpen,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for WebhookSecurityMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" => Ok(Self::FailOpen),
            "fail_closed" => Ok(Self::FailClosed),
            other => Err(ConfigError::Validation(format!(
                "unsupported webhook mode `{other}` (expected fail_open|fail_closed)"
            ))),
        }
    }
}

impl SyncConfig {
    pub fn loop_window(&self) -> chrono::Duration {
        i64::try_from(self.loop_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("bridgesync.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Webhook shared secret configured for the given system, if any.
    pub fn webhook_secret(&self, system: SystemType) -> Option<&SecretString> {
        match system {
            SystemType::Crm => self.crm.webhook_secret.as_ref(),
            SystemType::Finance => self.finance.webhook_secret.as_ref(),
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = Some(base_url);
            }
            if let Some(login_path) = crm.login_path {
                self.crm.login_path = login_path;
            }
            if let Some(probe_path) = crm.probe_path {
                self.crm.probe_path = probe_path;
            }
            if let Some(username) = crm.username {
                self.crm.username = Some(username);
            }
            if let Some(password) = crm.password {
                self.crm.password = Some(secret_value(password));
            }
            if let Some(device_id) = crm.device_id {
                self.crm.device_id = device_id;
            }
            if let Some(platform_type) = crm.platform_type {
                self.crm.platform_type = platform_type;
            }
            if let Some(os) = crm.os {
                self.crm.os = os;
            }
            if let Some(os_version) = crm.os_version {
                self.crm.os_version = os_version;
            }
            if let Some(device_token) = crm.device_token {
                self.crm.device_token = device_token;
            }
            if let Some(webhook_secret) = crm.webhook_secret {
                self.crm.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(finance) = patch.finance {
            if let Some(base_url) = finance.base_url {
                self.finance.base_url = Some(base_url);
            }
            if let Some(login_path) = finance.login_path {
                self.finance.login_path = login_path;
            }
            if let Some(probe_path) = finance.probe_path {
                self.finance.probe_path = probe_path;
            }
            if let Some(username) = finance.username {
                self.finance.username = Some(username);
            }
            if let Some(password) = finance.password {
                self.finance.password = Some(secret_value(password));
            }
            if let Some(webhook_secret) = finance.webhook_secret {
                self.finance.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(loop_window_secs) = sync.loop_window_secs {
                self.sync.loop_window_secs = loop_window_secs;
            }
            if let Some(auth_timeout_secs) = sync.auth_timeout_secs {
                self.sync.auth_timeout_secs = auth_timeout_secs;
            }
            if let Some(probe_timeout_secs) = sync.probe_timeout_secs {
                self.sync.probe_timeout_secs = probe_timeout_secs;
            }
            if let Some(minutes) = sync.min_resync_interval_minutes {
                self.sync.min_resync_interval_minutes = minutes;
            }
            if let Some(webhook_mode) = sync.webhook_mode {
                self.sync.webhook_mode = webhook_mode;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BRIDGESYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BRIDGESYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BRIDGESYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BRIDGESYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BRIDGESYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BRIDGESYNC_SERVER_PORT") {
            self.server.port = parse_u16("BRIDGESYNC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BRIDGESYNC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("BRIDGESYNC_CRM_BASE_URL") {
            self.crm.base_url = Some(value);
        }
        if let Some(value) = read_env("BRIDGESYNC_CRM_USERNAME") {
            self.crm.username = Some(value);
        }
        if let Some(value) = read_env("BRIDGESYNC_CRM_PASSWORD") {
            self.crm.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("BRIDGESYNC_CRM_DEVICE_ID") {
            self.crm.device_id = value;
        }
        if let Some(value) = read_env("BRIDGESYNC_CRM_DEVICE_TOKEN") {
            self.crm.device_token = value;
        }
        if let Some(value) = read_env("BRIDGESYNC_CRM_WEBHOOK_SECRET") {
            self.crm.webhook_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("BRIDGESYNC_FINANCE_BASE_URL") {
            self.finance.base_url = Some(value);
        }
        if let Some(value) = read_env("BRIDGESYNC_FINANCE_USERNAME") {
            self.finance.username = Some(value);
        }
        if let Some(value) = read_env("BRIDGESYNC_FINANCE_PASSWORD") {
            self.finance.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("BRIDGESYNC_FINANCE_WEBHOOK_SECRET") {
            self.finance.webhook_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("BRIDGESYNC_SYNC_LOOP_WINDOW_SECS") {
            self.sync.loop_window_secs = parse_u64("BRIDGESYNC_SYNC_LOOP_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_SYNC_AUTH_TIMEOUT_SECS") {
            self.sync.auth_timeout_secs =
                parse_u64("BRIDGESYNC_SYNC_AUTH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_SYNC_PROBE_TIMEOUT_SECS") {
            self.sync.probe_timeout_secs =
                parse_u64("BRIDGESYNC_SYNC_PROBE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_SYNC_MIN_RESYNC_INTERVAL_MINUTES") {
            self.sync.min_resync_interval_minutes =
                parse_u64("BRIDGESYNC_SYNC_MIN_RESYNC_INTERVAL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("BRIDGESYNC_SYNC_WEBHOOK_MODE") {
            self.sync.webhook_mode = value.parse()?;
        }

        let log_level =
            read_env("BRIDGESYNC_LOGGING_LEVEL").or_else(|| read_env("BRIDGESYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BRIDGESYNC_LOGGING_FORMAT").or_else(|| read_env("BRIDGESYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = Some(base_url);
        }
        if let Some(username) = overrides.crm_username {
            self.crm.username = Some(username);
        }
        if let Some(password) = overrides.crm_password {
            self.crm.password = Some(secret_value(password));
        }
        if let Some(webhook_secret) = overrides.crm_webhook_secret {
            self.crm.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(base_url) = overrides.finance_base_url {
            self.finance.base_url = Some(base_url);
        }
        if let Some(username) = overrides.finance_username {
            self.finance.username = Some(username);
        }
        if let Some(password) = overrides.finance_password {
            self.finance.password = Some(secret_value(password));
        }
        if let Some(webhook_secret) = overrides.finance_webhook_secret {
            self.finance.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(loop_window_secs) = overrides.loop_window_secs {
            self.sync.loop_window_secs = loop_window_secs;
        }
        if let Some(webhook_mode) = overrides.webhook_mode {
            self.sync.webhook_mode = webhook_mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_base_url("crm.base_url", self.crm.base_url.as_deref())?;
        validate_base_url("finance.base_url", self.finance.base_url.as_deref())?;
        validate_sync(&self.sync)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bridgesync.toml"), PathBuf::from("config/bridgesync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_base_url(key: &str, base_url: Option<&str>) -> Result<(), ConfigError> {
    if let Some(base_url) = base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn validate_sync(sync: &SyncConfig) -> Result<(), ConfigError> {
    if sync.loop_window_secs == 0 || sync.loop_window_secs > MAX_LOOP_WINDOW_SECS {
        return Err(ConfigError::Validation(format!(
            "sync.loop_window_secs must be in range 1..={MAX_LOOP_WINDOW_SECS}"
        )));
    }

    if sync.min_resync_interval_minutes > MAX_RESYNC_INTERVAL_MINUTES {
        return Err(ConfigError::Validation(format!(
            "sync.min_resync_interval_minutes must be at most {MAX_RESYNC_INTERVAL_MINUTES}"
        )));
    }

    for (key, value) in [
        ("sync.auth_timeout_secs", sync.auth_timeout_secs),
        ("sync.probe_timeout_secs", sync.probe_timeout_secs),
    ] {
        if value == 0 || value > 300 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    finance: Option<FinancePatch>,
    sync: Option<SyncPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    login_path: Option<String>,
    probe_path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    device_id: Option<String>,
    platform_type: Option<String>,
    os: Option<String>,
    os_version: Option<String>,
    device_token: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FinancePatch {
    base_url: Option<String>,
    login_path: Option<String>,
    probe_path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    loop_window_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    min_resync_interval_minutes: Option<u64>,
    webhook_mode: Option<WebhookSecurityMode>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, WebhookSecurityMode,
        MAX_LOOP_WINDOW_SECS, MAX_RESYNC_INTERVAL_MINUTES,
    };
    use crate::domain::system::SystemType;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.crm.username.is_none(), "crm username should default to unset")?;
        ensure(config.finance.password.is_none(), "finance password should default to unset")?;
        ensure(config.sync.loop_window_secs == 10, "loop window should default to 10 seconds")?;
        ensure(config.sync.auth_timeout_secs == 30, "auth timeout should default to 30 seconds")?;
        ensure(config.sync.probe_timeout_secs == 5, "probe timeout should default to 5 seconds")?;
        ensure(
            config.sync.webhook_mode == WebhookSecurityMode::FailOpen,
            "webhook validation should fail open by default",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FINANCE_PASSWORD", "from-env-password");
        env::set_var("TEST_CRM_WEBHOOK_SECRET", "from-env-secret");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("bridgesync.toml");
            fs::write(
                &path,
                r#"
[crm]
base_url = "https://crm.example.com"
webhook_secret = "${TEST_CRM_WEBHOOK_SECRET}"

[finance]
username = "sync-bot"
password = "${TEST_FINANCE_PASSWORD}"

[sync]
loop_window_secs = 20
webhook_mode = "fail_closed"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.finance.password.as_ref().map(|value| value.expose_secret())
                    == Some("from-env-password"),
                "finance password should be interpolated from environment",
            )?;
            ensure(
                config.webhook_secret(SystemType::Crm).map(|value| value.expose_secret())
                    == Some("from-env-secret"),
                "crm webhook secret should be interpolated from environment",
            )?;
            ensure(
                config.webhook_secret(SystemType::Finance).is_none(),
                "finance webhook secret should stay unset",
            )?;
            ensure(config.sync.loop_window_secs == 20, "loop window should come from file")?;
            ensure(
                config.sync.webhook_mode == WebhookSecurityMode::FailClosed,
                "webhook mode should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_FINANCE_PASSWORD", "TEST_CRM_WEBHOOK_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BRIDGESYNC_LOG_LEVEL", "warn");
        env::set_var("BRIDGESYNC_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["BRIDGESYNC_LOG_LEVEL", "BRIDGESYNC_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BRIDGESYNC_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("BRIDGESYNC_CRM_USERNAME", "env-user");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("bridgesync.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[crm]
username = "file-user"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.crm.username.as_deref() == Some("env-user"),
                "env username should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["BRIDGESYNC_DATABASE_URL", "BRIDGESYNC_CRM_USERNAME"]);
        result
    }

    #[test]
    fn validation_rejects_non_http_base_url() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                finance_base_url: Some("ftp://finance.example.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("finance.base_url")
        );
        ensure(has_message, "validation failure should mention finance.base_url")
    }

    #[test]
    fn validation_rejects_zero_loop_window() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                loop_window_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("loop_window_secs")),
            "zero loop window should be rejected",
        )
    }

    #[test]
    fn validation_bounds_loop_window_and_resync_interval() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let mut config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        config.sync.loop_window_secs = MAX_LOOP_WINDOW_SECS;
        ensure(config.validate().is_ok(), "one-day loop window should be accepted")?;
        ensure(
            config.sync.loop_window() == chrono::Duration::days(1),
            "loop window should convert to one day",
        )?;

        config.sync.loop_window_secs = 10_000_000_000_000_000;
        ensure(
            matches!(
                config.validate(),
                Err(ConfigError::Validation(ref message)) if message.contains("loop_window_secs")
            ),
            "oversized loop window should be rejected",
        )?;
        ensure(
            config.sync.loop_window() == chrono::TimeDelta::MAX,
            "oversized loop window should saturate instead of panicking",
        )?;

        config.sync.loop_window_secs = 10;
        config.sync.min_resync_interval_minutes = MAX_RESYNC_INTERVAL_MINUTES + 1;
        ensure(
            matches!(
                config.validate(),
                Err(ConfigError::Validation(ref message))
                    if message.contains("min_resync_interval_minutes")
            ),
            "oversized resync interval should be rejected",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("BRIDGESYNC_CRM_PASSWORD", "crm-secret-value");
        env::set_var("BRIDGESYNC_FINANCE_WEBHOOK_SECRET", "finance-hook-secret");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("crm-secret-value"), "debug output should not contain password")?;
            ensure(
                !debug.contains("finance-hook-secret"),
                "debug output should not contain webhook secret",
            )?;
            Ok(())
        })();

        clear_vars(&["BRIDGESYNC_CRM_PASSWORD", "BRIDGESYNC_FINANCE_WEBHOOK_SECRET"]);
        result
    }
}
