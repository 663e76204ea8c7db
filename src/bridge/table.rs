//! In-memory routing table backed by a `NodeStore`.
//!
//! Readers take an `Arc` snapshot of the node list and never hold a lock
//! while routing. Writers are serialized, persist first, and then publish
//! a fresh list, so a reader sees either the old set or the new one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::common::error::{RoutingError, RoutingResult, StoreResult};

use super::node::Node;
use super::store::NodeStore;

/// Immutable view of the node set at the time it was taken.
#[derive(Debug, Clone)]
pub struct NodeSnapshot(Arc<Vec<Node>>);

impl NodeSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a NodeSnapshot {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Authoritative set of bridged channels.
pub struct RoutingTable {
    store: Arc<dyn NodeStore>,
    nodes: RwLock<Arc<Vec<Node>>>,
    /// Serializes add/remove/reload.
    writer: Mutex<()>,
}

impl RoutingTable {
    /// Build a table and populate it from the store.
    pub fn load(store: Arc<dyn NodeStore>) -> StoreResult<Self> {
        let table = Self {
            store,
            nodes: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        };
        table.reload()?;
        Ok(table)
    }

    /// Replace the working set with the store contents.
    ///
    /// Returns the number of nodes loaded.
    pub fn reload(&self) -> StoreResult<usize> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for node in self.store.load_all()? {
            if seen.insert(node.channel_id) {
                nodes.push(node);
            } else {
                warn!(channel_id = node.channel_id, "Skipping duplicate stored node");
            }
        }

        let count = nodes.len();
        self.publish(nodes);
        info!(count, "Routing table loaded");
        Ok(count)
    }

    /// Add a node. Fails without side effects if the channel is already bridged.
    pub fn add_node(&self, node: Node) -> RoutingResult<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.current();
        if current.iter().any(|n| n.channel_id == node.channel_id) {
            return Err(RoutingError::DuplicateChannel {
                channel_id: node.channel_id,
            });
        }

        self.store.add(&node)?;

        debug!(channel_id = node.channel_id, endpoint = %node.endpoint_channel, "Node added");
        let mut nodes = current.as_ref().clone();
        nodes.push(node);
        self.publish(nodes);
        Ok(())
    }

    /// Remove the node for `channel_id` from the store, then from memory.
    ///
    /// Returns whether a node was found in either place.
    pub fn remove_node(&self, channel_id: u64) -> RoutingResult<bool> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let removed_stored = self.store.remove(channel_id)?;

        let current = self.current();
        let nodes: Vec<Node> = current
            .iter()
            .filter(|n| n.channel_id != channel_id)
            .cloned()
            .collect();
        let removed_live = nodes.len() != current.len();
        if removed_live {
            self.publish(nodes);
        }

        if removed_stored != removed_live {
            warn!(
                channel_id,
                removed_stored, removed_live, "Store and routing table disagreed on node"
            );
        }
        Ok(removed_stored || removed_live)
    }

    pub fn find_by_channel(&self, server_id: u64, channel_id: u64) -> Option<Node> {
        self.current()
            .iter()
            .find(|n| n.server_id == server_id && n.channel_id == channel_id)
            .cloned()
    }

    /// Snapshot of every node; later writes are not visible through it.
    pub fn all_nodes(&self) -> NodeSnapshot {
        NodeSnapshot(self.current())
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<Node>> {
        Arc::clone(&self.nodes.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, nodes: Vec<Node>) {
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::node::Direction;
    use crate::bridge::store::SqliteNodeStore;
    use crate::common::error::StoreError;

    fn table() -> RoutingTable {
        RoutingTable::load(Arc::new(SqliteNodeStore::open_in_memory().unwrap())).unwrap()
    }

    fn node(server_id: u64, channel_id: u64, direction: Direction) -> Node {
        Node::new(server_id, channel_id, format!("c{}", channel_id), "global", direction)
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    impl NodeStore for BrokenStore {
        fn add(&self, _node: &Node) -> StoreResult<()> {
            Err(StoreError::Poisoned("broken".to_string()))
        }

        fn remove(&self, _channel_id: u64) -> StoreResult<bool> {
            Err(StoreError::Poisoned("broken".to_string()))
        }

        fn load_all(&self) -> StoreResult<Vec<Node>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_add_and_find() {
        let table = table();
        table.add_node(node(1, 10, Direction::ReadWrite)).unwrap();

        assert_eq!(table.find_by_channel(1, 10), Some(node(1, 10, Direction::ReadWrite)));
        assert_eq!(table.find_by_channel(2, 10), None);
        assert_eq!(table.find_by_channel(1, 11), None);
    }

    #[test]
    fn test_duplicate_channel_rejected_and_table_unchanged() {
        let table = table();
        table.add_node(node(1, 10, Direction::ReadWrite)).unwrap();
        let before: Vec<Node> = table.all_nodes().iter().cloned().collect();

        let result = table.add_node(node(2, 10, Direction::ReadOnly));
        assert!(matches!(
            result,
            Err(RoutingError::DuplicateChannel { channel_id: 10 })
        ));

        let after: Vec<Node> = table.all_nodes().iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_failed_persist_leaves_table_unchanged() {
        let table = RoutingTable::load(Arc::new(BrokenStore)).unwrap();
        let result = table.add_node(node(1, 10, Direction::ReadWrite));

        assert!(matches!(result, Err(RoutingError::Store(_))));
        assert!(table.is_empty());
        assert!(table.remove_node(10).is_err());
    }

    #[test]
    fn test_remove_node() {
        let table = table();
        table.add_node(node(1, 10, Direction::ReadWrite)).unwrap();
        table.add_node(node(1, 11, Direction::ReadWrite)).unwrap();

        assert!(table.remove_node(10).unwrap());
        assert!(!table.remove_node(10).unwrap());
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_channel(1, 10), None);
    }

    #[test]
    fn test_snapshot_ignores_later_writes() {
        let table = table();
        table.add_node(node(1, 10, Direction::ReadWrite)).unwrap();

        let snapshot = table.all_nodes();
        table.add_node(node(1, 11, Direction::ReadWrite)).unwrap();
        table.remove_node(10).unwrap();

        let ids: Vec<u64> = snapshot.iter().map(|n| n.channel_id).collect();
        assert_eq!(ids, vec![10]);
        // Restartable.
        assert_eq!(snapshot.iter().count(), 1);
        assert_eq!(table.all_nodes().iter().next().map(|n| n.channel_id), Some(11));
    }

    #[test]
    fn test_reload_reads_store() {
        let store = Arc::new(SqliteNodeStore::open_in_memory().unwrap());
        let table = RoutingTable::load(store.clone()).unwrap();
        assert!(table.is_empty());

        store.add(&node(3, 30, Direction::ReadOnly)).unwrap();
        assert_eq!(table.reload().unwrap(), 1);
        assert!(table.find_by_channel(3, 30).is_some());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let table = Arc::new(table());
        let mut handles = Vec::new();

        for i in 0..4u64 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for j in 0..25u64 {
                    table.add_node(node(1, i * 100 + j, Direction::ReadWrite)).unwrap();
                    let snapshot = table.all_nodes();
                    let unique: HashSet<u64> = snapshot.iter().map(|n| n.channel_id).collect();
                    assert_eq!(unique.len(), snapshot.len());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 100);
    }
}
