//! Routing entries linking one guild channel to one hub-side channel.

use std::fmt;

/// Hub channel key for the global game chat.
pub const ENDPOINT_CHANNEL_GLOBAL: &str = "global";
/// Hub channel key for the match-making chat.
pub const ENDPOINT_CHANNEL_FINDGAME: &str = "findgame";

/// Direction policy for a bridged channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives relayed traffic but never forwards its own messages.
    ReadOnly,
    ReadWrite,
}

impl Direction {
    /// Convert from the persisted numeric id.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(Self::ReadOnly),
            1 => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn to_id(self) -> i64 {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
        }
    }

    /// Parse the direction argument of an administrative command.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "0" | "read" | "ro" | "readonly" | "read_only" => Some(Self::ReadOnly),
            "1" | "readwrite" | "rw" | "read_write" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    /// Whether messages posted in this channel leave it.
    pub fn allows_outbound(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("read-only"),
            Self::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// One bridged channel pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub server_id: u64,
    /// Unique across the table.
    pub channel_id: u64,
    /// Display only.
    pub channel_name: String,
    pub endpoint_channel: String,
    pub direction: Direction,
}

impl Node {
    pub fn new(
        server_id: u64,
        channel_id: u64,
        channel_name: impl Into<String>,
        endpoint_channel: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            server_id,
            channel_id,
            channel_name: channel_name.into(),
            endpoint_channel: endpoint_channel.into(),
            direction,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} ({}) -> {} [{}]",
            self.channel_name, self.channel_id, self.endpoint_channel, self.direction
        )
    }
}
