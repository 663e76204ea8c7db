//! Administrative operations on the live routing table.
//!
//! Each operation answers with a human-readable acknowledgment or reason,
//! ready to be posted back to whoever issued the command.

use std::sync::Arc;

use tracing::{error, info};

use crate::common::error::RoutingError;

use super::node::{Direction, Node};
use super::table::{NodeSnapshot, RoutingTable};

#[derive(Clone)]
pub struct Administration {
    table: Arc<RoutingTable>,
}

impl Administration {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    /// Bridge `channel_id` to a hub channel. Applies immediately.
    pub fn set_node(
        &self,
        server_id: u64,
        channel_id: u64,
        endpoint_channel: &str,
        channel_name: &str,
        direction: Direction,
    ) -> Result<String, String> {
        let endpoint_channel = endpoint_channel.trim();
        if endpoint_channel.is_empty() {
            return Err("Endpoint channel must not be empty".to_string());
        }

        let node = Node::new(server_id, channel_id, channel_name, endpoint_channel, direction);
        let summary = node.to_string();
        match self.table.add_node(node) {
            Ok(()) => {
                info!(server_id, channel_id, endpoint_channel, %direction, "Node set");
                Ok(format!("Node set: {}", summary))
            }
            Err(RoutingError::DuplicateChannel { .. }) => Err(format!(
                "Channel #{} is already bridged; delete its node first",
                channel_name
            )),
            Err(e) => {
                error!(channel_id, "Failed to set node: {}", e);
                Err(format!("Failed to save node: {}", e))
            }
        }
    }

    pub fn delete_node(&self, channel_id: u64) -> Result<String, String> {
        match self.table.remove_node(channel_id) {
            Ok(true) => {
                info!(channel_id, "Node deleted");
                Ok(format!("Node for channel {} deleted", channel_id))
            }
            Ok(false) => Err(format!("No node exists for channel {}", channel_id)),
            Err(e) => {
                error!(channel_id, "Failed to delete node: {}", e);
                Err(format!("Failed to delete node: {}", e))
            }
        }
    }

    pub fn list_nodes(&self) -> NodeSnapshot {
        self.table.all_nodes()
    }

    /// One line per node, for chat replies.
    pub fn describe_nodes(&self) -> Vec<String> {
        let snapshot = self.list_nodes();
        if snapshot.is_empty() {
            return vec!["No nodes configured".to_string()];
        }
        snapshot.iter().map(|n| n.to_string()).collect()
    }
}
