use std::fs;
use std::path::Path;

use bridgesync_core::config::{AppConfig, LoadOptions};
use bridgesync_core::webhook::SIGNATURE_PREFIX;
use bridgesync_core::{SystemType, WebhookSignatureValidator};

use crate::commands::CommandResult;

/// Signs the file's raw bytes with the configured webhook secret of `system`.
pub fn run(system: &str, file: &Path) -> CommandResult {
    let Some(system) = SystemType::parse(system) else {
        return CommandResult::failure(
            "sign",
            "invalid_argument",
            format!("unknown system `{system}`; expected crm or finance"),
            2,
        );
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sign",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let payload = match fs::read(file) {
        Ok(payload) => payload,
        Err(error) => {
            return CommandResult::failure(
                "sign",
                "io",
                format!("could not read `{}`: {error}", file.display()),
                3,
            );
        }
    };

    match WebhookSignatureValidator::from_config(&config, system).generate_signature(&payload) {
        Ok(signature) => CommandResult::success("sign", format!("{SIGNATURE_PREFIX}{signature}")),
        Err(error) => CommandResult::failure("sign", error.error_class(), error.to_string(), 4),
    }
}
