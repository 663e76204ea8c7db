//! Game chat hub payloads.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// Chat message as delivered by the hub's `SendMessage` callback.
///
/// Every field is optional on the wire. The hub serializes PascalCase
/// names; camelCase is accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubChatMessage {
    #[serde(default, alias = "Id")]
    pub id: Option<String>,
    #[serde(default, alias = "UberId")]
    pub uber_id: Option<String>,
    #[serde(default, alias = "Text")]
    pub text: Option<String>,
    #[serde(default, alias = "TimeStamp")]
    pub time_stamp: Option<String>,
    #[serde(default, alias = "PlayerName")]
    pub player_name: Option<String>,
    #[serde(default, alias = "ChannelName")]
    pub channel_name: Option<String>,
    /// API key of the client that pushed the message.
    #[serde(default, alias = "Source")]
    pub source: Option<String>,
    /// Set only on administrative direct messages.
    #[serde(default, alias = "TargetUserId")]
    pub target_user_id: Option<String>,
}

impl HubChatMessage {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time_stamp.as_deref().and_then(parse_timestamp)
    }
}

/// Parse an RFC 3339 timestamp, or an offset-less one taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
