//! Canonical message types for relay communication.
//!
//! This module defines the single source of truth for message types
//! flowing between the guild platform, the router and the game chat hub.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Display name used for direct messages pushed by the hub administration.
pub const ADMINISTRATION_NAME: &str = "Administration";

/// Which platform (or sub-origin) produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    GameChat,
    GameChatAdministration,
    InternationalDiscord,
    RussianDiscord,
    FrenchDiscord,
    Unknown,
}

impl Origin {
    /// Parse an origin from its short code. Unrecognised codes map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "game_c" => Self::GameChat,
            "game_c_admin" => Self::GameChatAdministration,
            "int_d" => Self::InternationalDiscord,
            "ru_d" => Self::RussianDiscord,
            "fr_d" => Self::FrenchDiscord,
            _ => Self::Unknown,
        }
    }

    /// Short code, as stored and configured.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GameChat => "game_c",
            Self::GameChatAdministration => "game_c_admin",
            Self::InternationalDiscord => "int_d",
            Self::RussianDiscord => "ru_d",
            Self::FrenchDiscord => "fr_d",
            Self::Unknown => "unknown",
        }
    }

    /// Human readable name.
    pub fn full_name(&self) -> &'static str {
        match self {
            Self::GameChat => "Game Chat",
            Self::GameChatAdministration => "Game Chat Administration",
            Self::InternationalDiscord => "International Discord",
            Self::RussianDiscord => "Russian Discord",
            Self::FrenchDiscord => "French Discord",
            Self::Unknown => "Unknown origin",
        }
    }

    /// True for origins on the guild platform.
    pub fn is_guild(&self) -> bool {
        matches!(
            self,
            Self::InternationalDiscord | Self::RussianDiscord | Self::FrenchDiscord
        )
    }
}

/// Platform-neutral chat message used for routing decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub origin: Origin,
    /// Channel identifier on the origin side.
    pub channel: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CanonicalMessage {
    pub fn new(
        origin: Origin,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        text: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            origin,
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            text: text.into(),
            timestamp,
        }
    }
}

/// Message pushed toward the game chat hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundGameMessage {
    pub player_id: String,
    pub text: String,
    pub player_name: String,
}

impl OutboundGameMessage {
    /// Build the hub payload for a guild-originated message.
    ///
    /// Returns `None` for any other origin.
    pub fn from_canonical(message: &CanonicalMessage) -> Option<Self> {
        if !message.origin.is_guild() {
            return None;
        }
        Some(Self {
            player_id: message.user_id.clone(),
            text: message.text.clone(),
            player_name: message.user_name.clone(),
        })
    }
}

/// A guild-platform message as received, before normalisation.
///
/// Carries the server/channel identifiers the router needs for lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildMessage {
    pub server_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    /// Mention-resolved text.
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl GuildMessage {
    pub fn to_canonical(&self, origin: Origin) -> CanonicalMessage {
        CanonicalMessage::new(
            origin,
            self.channel_id.to_string(),
            self.author_id.to_string(),
            self.author_name.clone(),
            self.content.clone(),
            self.timestamp,
        )
    }
}

/// Receipt events raised by the hub connection.
#[derive(Debug, Clone, PartialEq)]
pub enum HubInbound {
    /// Regular game chat traffic.
    Received(CanonicalMessage),
    /// Direct message from the hub administration to one guild user.
    ReceivedFromAdministration {
        message: CanonicalMessage,
        target_user_id: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_codes() {
        for origin in [
            Origin::GameChat,
            Origin::GameChatAdministration,
            Origin::InternationalDiscord,
            Origin::RussianDiscord,
            Origin::FrenchDiscord,
        ] {
            assert_eq!(Origin::from_code(origin.code()), origin);
        }
        assert_eq!(Origin::from_code("int_d").full_name(), "International Discord");
    }

    #[test]
    fn test_unknown_origin_is_sentinel() {
        assert_eq!(Origin::from_code(""), Origin::Unknown);
        assert_eq!(Origin::from_code("de_d"), Origin::Unknown);
        assert_eq!(Origin::Unknown.full_name(), "Unknown origin");
    }

    #[test]
    fn test_outbound_only_from_guild_origin() {
        let guild = CanonicalMessage::new(Origin::RussianDiscord, "10", "42", "Bob", "hi", None);
        let outbound = OutboundGameMessage::from_canonical(&guild).unwrap();
        assert_eq!(outbound.player_id, "42");
        assert_eq!(outbound.player_name, "Bob");
        assert_eq!(outbound.text, "hi");

        let game = CanonicalMessage::new(Origin::GameChat, "global", "u1", "Ann", "yo", None);
        assert!(OutboundGameMessage::from_canonical(&game).is_none());
    }

    #[test]
    fn test_outbound_wire_shape() {
        let message = OutboundGameMessage {
            player_id: "42".to_string(),
            text: "hello".to_string(),
            player_name: "Bob".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["playerId"], "42");
        assert_eq!(json["playerName"], "Bob");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_guild_message_to_canonical() {
        let message = GuildMessage {
            server_id: 1,
            channel_id: 2,
            author_id: 3,
            author_name: "Bob".to_string(),
            content: "hi".to_string(),
            timestamp: None,
        };
        let canonical = message.to_canonical(Origin::InternationalDiscord);
        assert_eq!(canonical.channel, "2");
        assert_eq!(canonical.user_id, "3");
        assert_eq!(canonical.origin, Origin::InternationalDiscord);
    }
}
