//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;
pub mod reconnect;
pub mod types;

pub use messages::{CanonicalMessage, GuildMessage, HubInbound, Origin, OutboundGameMessage};
pub use types::ConnectionState;
