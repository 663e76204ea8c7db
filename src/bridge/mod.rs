//! Relay core between the guild platform and the game chat hub.
//!
//! ## Module Structure
//!
//! - `node`: Routing entries and their direction policy
//! - `store`: Durable node storage (`NodeStore`, `SqliteNodeStore`)
//! - `table`: Snapshot-consistent routing table
//! - `admin`: Administrative operations on the live table
//! - `orchestrator`: Fan-out router (`Router`) and the outlet traits
//! - `channels`: Communication channel structures

pub mod admin;
pub mod channels;
pub mod node;
pub mod orchestrator;
pub mod store;
pub mod table;

pub use admin::Administration;
pub use channels::ChannelBundle;
pub use node::Direction;
pub use orchestrator::{GuildOutlet, HubOutlet, Router};
pub use store::SqliteNodeStore;
pub use table::RoutingTable;
