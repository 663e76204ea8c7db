//! Discord guild platform integration.
//!
//! This module provides the guild side of the relay: the gateway
//! connection, the `!transmit` admin commands and message styling.

pub mod client;
pub mod commands;
pub mod format;

// Re-export main types for external use
pub use client::GuildConnection;
pub use commands::AdminCommands;
