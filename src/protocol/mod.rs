//! Game chat hub wire protocol.

pub mod packets;
pub mod signalr;

pub use packets::HubChatMessage;
