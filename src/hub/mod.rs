//! Game chat hub side of the relay.
//!
//! - `transport`: one connection attempt over SignalR/WebSocket
//! - `connection`: connect/reconnect state machine and inbound translation
//! - `queue`: outbound queue and its drain loop

pub mod connection;
pub mod queue;
pub mod transport;

pub use connection::{HubConnection, HubSettings};
pub use queue::outbound_queue;
pub use transport::{HubCredentials, SignalRTransport};
