//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::common::Origin;
use crate::config::types::Config;

const PLACEHOLDER_PREFIX: &str = "YOUR_";

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    check_credential(&mut errors, "discord.token", &config.discord.token);
    check_credential(&mut errors, "hub.api_key", &config.hub.api_key);
    check_credential(&mut errors, "hub.api_secret", &config.hub.api_secret);
    check_credential(&mut errors, "hub.url", &config.hub.url);

    if !config.hub.url.is_empty() {
        let scheme_ok = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| config.hub.url.to_lowercase().starts_with(scheme));
        if !scheme_ok {
            errors.push(format!(
                "hub.url '{}' must start with http://, https://, ws:// or wss://",
                config.hub.url
            ));
        }
    }

    let origin = Origin::from_code(&config.discord.origin);
    if !origin.is_guild() {
        errors.push(format!(
            "discord.origin '{}' is not a guild origin (use: int_d, ru_d, fr_d)",
            config.discord.origin
        ));
    }

    if config.hub.hub_name.is_empty() {
        errors.push("hub.hub_name is required".to_string());
    }
    if config.hub.push_method.is_empty() {
        errors.push("hub.push_method is required".to_string());
    }
    if config.hub.receive_method.is_empty() {
        errors.push("hub.receive_method is required".to_string());
    }
    if config.hub.retry_delay_ms == 0 {
        errors.push("hub.retry_delay_ms must be non-zero".to_string());
    }
    if config.hub.handshake_timeout_secs == 0 {
        errors.push("hub.handshake_timeout_secs must be non-zero".to_string());
    }
    if config.hub.invoke_timeout_secs == 0 {
        errors.push("hub.invoke_timeout_secs must be non-zero".to_string());
    }
    if config.relay.drain_interval_ms == 0 {
        errors.push("relay.drain_interval_ms must be non-zero".to_string());
    }
    if config.storage.database.is_empty() {
        errors.push("storage.database is required".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn check_credential(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{} is required", field));
    } else if value.starts_with(PLACEHOLDER_PREFIX) {
        errors.push(format!(
            "{} has not been configured (still using placeholder)",
            field
        ));
    }
}
