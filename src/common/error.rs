//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Persisted node store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to prepare database folder '{path}': {source}")]
    Folder {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),
}

/// Routing table errors reported to administrative callers.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Channel {channel_id} is already bridged")]
    DuplicateChannel { channel_id: u64 },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Game chat hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub connection already exists")]
    AlreadyConnected,

    #[error("Invalid hub url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid header value for {header}")]
    InvalidHeader { header: &'static str },

    #[error("Hub handshake failed: {message}")]
    Handshake { message: String },

    #[error("Hub handshake timed out")]
    HandshakeTimeout,

    #[error("Hub HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Hub protocol error: {message}")]
    Protocol { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hub is not connected")]
    NotConnected,

    #[error("Invocation of '{target}' failed: {message}")]
    Invocation { target: String, message: String },

    #[error("Invocation of '{target}' timed out")]
    InvocationTimeout { target: String },
}

/// Discord-related errors.
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound { channel_id: u64 },

    #[error("User {user_id} cannot accept direct messages")]
    UserUnreachable { user_id: u64 },

    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),
}

/// Result type alias for hub operations.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Result type alias for routing operations.
pub type RoutingResult<T> = std::result::Result<T, RoutingError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
