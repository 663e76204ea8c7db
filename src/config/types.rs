//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::common::reconnect::DEFAULT_HUB_RETRY_DELAY;
use crate::hub::queue::DEFAULT_DRAIN_INTERVAL;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. Required.
    #[serde(default)]
    pub token: String,
    /// Origin code stamped on messages from this guild platform.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// User ids allowed to run `!transmit` commands. Empty allows everyone.
    #[serde(default)]
    pub admins: Vec<u64>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            origin: default_origin(),
            admins: Vec::new(),
        }
    }
}

/// Game chat hub connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Hub proxy name used in `connectionData` and on every call.
    #[serde(default = "default_hub_name")]
    pub hub_name: String,
    /// Hub method invoked to push a message into the game chat.
    #[serde(default = "default_push_method")]
    pub push_method: String,
    /// Hub method the server invokes on us for new chat messages.
    #[serde(default = "default_receive_method")]
    pub receive_method: String,
    /// Game chat channel argument passed with every push.
    #[serde(default = "default_push_channel")]
    pub push_channel: String,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
}

impl HubConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            hub_name: default_hub_name(),
            push_method: default_push_method(),
            receive_method: default_receive_method(),
            push_channel: default_push_channel(),
            retry_delay_ms: default_retry_delay_ms(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
        }
    }
}

/// Node database location.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

/// Outbound relay tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Cadence of the outbound drain loop.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

impl RelayConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

fn default_origin() -> String {
    "int_d".to_string()
}

fn default_hub_name() -> String {
    "chathub".to_string()
}

fn default_push_method() -> String {
    "PushExternalMessage".to_string()
}

fn default_receive_method() -> String {
    "SendMessage".to_string()
}

fn default_push_channel() -> String {
    "Global".to_string()
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_HUB_RETRY_DELAY.as_millis() as u64
}

fn default_handshake_timeout_secs() -> u64 {
    15
}

fn default_invoke_timeout_secs() -> u64 {
    10
}

fn default_database() -> String {
    "databases/sqlite/transmitnodes.db".to_string()
}

fn default_drain_interval_ms() -> u64 {
    DEFAULT_DRAIN_INTERVAL.as_millis() as u64
}
