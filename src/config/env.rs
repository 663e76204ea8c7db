//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `TRANSMITTER_DISCORD_TOKEN` - Discord bot token
//! - `TRANSMITTER_HUB_URL` - Game chat hub url
//! - `TRANSMITTER_HUB_API_KEY` - Hub API key
//! - `TRANSMITTER_HUB_API_SECRET` - Hub API secret
//! - `TRANSMITTER_DATABASE` - Node database path

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "TRANSMITTER";

/// Apply environment variable overrides to a config.
///
/// This allows credentials to be provided via environment variables
/// instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }

    if let Ok(url) = env::var(format!("{}_HUB_URL", ENV_PREFIX)) {
        config.hub.url = url;
    }
    if let Ok(key) = env::var(format!("{}_HUB_API_KEY", ENV_PREFIX)) {
        config.hub.api_key = key;
    }
    if let Ok(secret) = env::var(format!("{}_HUB_API_SECRET", ENV_PREFIX)) {
        config.hub.api_secret = secret;
    }

    if let Ok(database) = env::var(format!("{}_DATABASE", ENV_PREFIX)) {
        config.storage.database = database;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `TRANSMITTER_CONFIG` environment variable, otherwise returns "transmitter.toml".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "transmitter.toml".to_string())
}
