//! Router that ties the guild platform and the game chat hub together.
//!
//! Routing decisions are computed as a list of `Dispatch` values first
//! and then fired off as independent background sends.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::common::{GuildMessage, HubInbound, Origin, OutboundGameMessage};

use super::table::RoutingTable;

/// Send side of the guild connection.
#[async_trait]
pub trait GuildOutlet: Send + Sync + 'static {
    /// Post a relayed chat line into a guild channel. Failures are logged by the implementor.
    async fn send_chat(&self, server_id: u64, channel_id: u64, user_name: &str, text: &str);

    /// Send a private message to a user. Failures are logged by the implementor.
    async fn send_direct(&self, user_id: u64, user_name: &str, text: &str);
}

/// Send side of the hub connection.
pub trait HubOutlet: Send + Sync + 'static {
    /// Queue a message for the hub. Never blocks on the network.
    fn pull_message(&self, message: OutboundGameMessage);
}

/// One outbound send decided by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Chat {
        server_id: u64,
        channel_id: u64,
        user_name: String,
        text: String,
    },
    Direct {
        user_id: u64,
        user_name: String,
        text: String,
    },
    Hub(OutboundGameMessage),
}

/// Fan-out router between the two platform connections.
pub struct Router<G, H> {
    table: Arc<RoutingTable>,
    guild: Arc<G>,
    hub: Arc<H>,
    /// Origin stamped on guild messages.
    guild_origin: Origin,
}

impl<G: GuildOutlet, H: HubOutlet> Router<G, H> {
    pub fn new(table: Arc<RoutingTable>, guild: Arc<G>, hub: Arc<H>, guild_origin: Origin) -> Self {
        Self {
            table,
            guild,
            hub,
            guild_origin,
        }
    }

    /// Decide where a guild message goes.
    ///
    /// Unbridged and read-only channels produce nothing. Otherwise every
    /// other bridged channel gets a copy and the hub gets one message.
    pub fn plan_guild_message(&self, message: &GuildMessage) -> Vec<Dispatch> {
        let source = match self
            .table
            .find_by_channel(message.server_id, message.channel_id)
        {
            Some(node) => node,
            None => {
                debug!(
                    server_id = message.server_id,
                    channel_id = message.channel_id,
                    "Dropping message from unbridged channel"
                );
                return Vec::new();
            }
        };

        if !source.direction.allows_outbound() {
            debug!(
                channel_id = source.channel_id,
                "Dropping message from read-only channel"
            );
            return Vec::new();
        }

        let mut plan: Vec<Dispatch> = self
            .table
            .all_nodes()
            .iter()
            .filter(|node| node.channel_id != source.channel_id)
            .map(|node| Dispatch::Chat {
                server_id: node.server_id,
                channel_id: node.channel_id,
                user_name: message.author_name.clone(),
                text: message.content.clone(),
            })
            .collect();

        let canonical = message.to_canonical(self.guild_origin);
        match OutboundGameMessage::from_canonical(&canonical) {
            Some(outbound) => plan.push(Dispatch::Hub(outbound)),
            None => warn!(
                origin = self.guild_origin.code(),
                "Guild origin is not a guild platform, not forwarding to hub"
            ),
        }

        plan
    }

    /// Decide where a hub event goes.
    ///
    /// Chat traffic is broadcast to every bridged channel regardless of
    /// direction. Administrative messages go to exactly one user.
    pub fn plan_hub_event(&self, event: &HubInbound) -> Vec<Dispatch> {
        match event {
            HubInbound::Received(message) => self
                .table
                .all_nodes()
                .iter()
                .map(|node| Dispatch::Chat {
                    server_id: node.server_id,
                    channel_id: node.channel_id,
                    user_name: message.user_name.clone(),
                    text: message.text.clone(),
                })
                .collect(),
            HubInbound::ReceivedFromAdministration {
                message,
                target_user_id,
            } => vec![Dispatch::Direct {
                user_id: *target_user_id,
                user_name: message.user_name.clone(),
                text: message.text.clone(),
            }],
        }
    }

    /// Fire every send without waiting on any of them.
    pub fn dispatch(&self, plan: Vec<Dispatch>) {
        for item in plan {
            match item {
                Dispatch::Chat {
                    server_id,
                    channel_id,
                    user_name,
                    text,
                } => {
                    let guild = Arc::clone(&self.guild);
                    tokio::spawn(async move {
                        guild.send_chat(server_id, channel_id, &user_name, &text).await;
                    });
                }
                Dispatch::Direct {
                    user_id,
                    user_name,
                    text,
                } => {
                    let guild = Arc::clone(&self.guild);
                    tokio::spawn(async move {
                        guild.send_direct(user_id, &user_name, &text).await;
                    });
                }
                Dispatch::Hub(message) => self.hub.pull_message(message),
            }
        }
    }

    pub fn handle_guild_message(&self, message: GuildMessage) {
        let plan = self.plan_guild_message(&message);
        if !plan.is_empty() {
            info!(
                channel_id = message.channel_id,
                sends = plan.len(),
                "Discord -> relay: [{}] {}",
                message.author_name,
                message.content
            );
        }
        self.dispatch(plan);
    }

    pub fn handle_hub_event(&self, event: HubInbound) {
        let plan = self.plan_hub_event(&event);
        match &event {
            HubInbound::Received(message) => info!(
                channel = %message.channel,
                sends = plan.len(),
                "Game chat -> Discord: [{}] {}",
                message.user_name,
                message.text
            ),
            HubInbound::ReceivedFromAdministration { target_user_id, .. } => info!(
                target_user_id,
                "Administration -> Discord direct message"
            ),
        }
        self.dispatch(plan);
    }

    /// Consume both receipt streams until shutdown or until both close.
    pub async fn run(
        self,
        mut guild_rx: mpsc::UnboundedReceiver<GuildMessage>,
        mut hub_rx: mpsc::UnboundedReceiver<HubInbound>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut guild_open = true;
        let mut hub_open = true;

        while guild_open || hub_open {
            tokio::select! {
                message = guild_rx.recv(), if guild_open => {
                    match message {
                        Some(message) => self.handle_guild_message(message),
                        None => {
                            debug!("Guild event channel closed");
                            guild_open = false;
                        }
                    }
                }
                event = hub_rx.recv(), if hub_open => {
                    match event {
                        Some(event) => self.handle_hub_event(event),
                        None => {
                            debug!("Hub event channel closed");
                            hub_open = false;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::bridge::node::{Direction, Node};
    use crate::bridge::store::SqliteNodeStore;
    use crate::common::CanonicalMessage;

    #[derive(Default)]
    struct RecordingGuild {
        sends: Mutex<Vec<Dispatch>>,
    }

    #[async_trait]
    impl GuildOutlet for RecordingGuild {
        async fn send_chat(&self, server_id: u64, channel_id: u64, user_name: &str, text: &str) {
            self.sends.lock().unwrap().push(Dispatch::Chat {
                server_id,
                channel_id,
                user_name: user_name.to_string(),
                text: text.to_string(),
            });
        }

        async fn send_direct(&self, user_id: u64, user_name: &str, text: &str) {
            self.sends.lock().unwrap().push(Dispatch::Direct {
                user_id,
                user_name: user_name.to_string(),
                text: text.to_string(),
            });
        }
    }

    #[derive(Default)]
    struct RecordingHub {
        pulled: Mutex<Vec<OutboundGameMessage>>,
    }

    impl HubOutlet for RecordingHub {
        fn pull_message(&self, message: OutboundGameMessage) {
            self.pulled.lock().unwrap().push(message);
        }
    }

    fn router(nodes: &[Node]) -> (Router<RecordingGuild, RecordingHub>, Arc<RecordingGuild>, Arc<RecordingHub>) {
        let store = Arc::new(SqliteNodeStore::open_in_memory().unwrap());
        let table = Arc::new(RoutingTable::load(store).unwrap());
        for node in nodes {
            table.add_node(node.clone()).unwrap();
        }
        let guild = Arc::new(RecordingGuild::default());
        let hub = Arc::new(RecordingHub::default());
        let router = Router::new(
            table,
            Arc::clone(&guild),
            Arc::clone(&hub),
            Origin::InternationalDiscord,
        );
        (router, guild, hub)
    }

    fn two_nodes() -> Vec<Node> {
        vec![
            Node::new(1, 11, "g1", "global", Direction::ReadWrite),
            Node::new(2, 22, "g2", "global", Direction::ReadOnly),
        ]
    }

    fn guild_message(server_id: u64, channel_id: u64) -> GuildMessage {
        GuildMessage {
            server_id,
            channel_id,
            author_id: 42,
            author_name: "Bob".to_string(),
            content: "hi".to_string(),
            timestamp: None,
        }
    }

    fn chat(server_id: u64, channel_id: u64, user_name: &str, text: &str) -> Dispatch {
        Dispatch::Chat {
            server_id,
            channel_id,
            user_name: user_name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_read_write_node_fans_out_and_enqueues() {
        let (router, _, _) = router(&two_nodes());
        let plan = router.plan_guild_message(&guild_message(1, 11));

        assert_eq!(
            plan,
            vec![
                chat(2, 22, "Bob", "hi"),
                Dispatch::Hub(OutboundGameMessage {
                    player_id: "42".to_string(),
                    text: "hi".to_string(),
                    player_name: "Bob".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn test_read_only_node_forwards_nothing() {
        let (router, _, _) = router(&two_nodes());
        assert!(router.plan_guild_message(&guild_message(2, 22)).is_empty());
    }

    #[test]
    fn test_unknown_channel_discarded() {
        let (router, _, _) = router(&two_nodes());
        assert!(router.plan_guild_message(&guild_message(1, 99)).is_empty());
        // Channel id alone is not enough; the server must match too.
        assert!(router.plan_guild_message(&guild_message(2, 11)).is_empty());
    }

    #[test]
    fn test_hub_message_broadcasts_to_every_node() {
        let (router, _, _) = router(&two_nodes());
        let message = CanonicalMessage::new(Origin::GameChat, "global", "u1", "Ann", "yo", None);
        let plan = router.plan_hub_event(&HubInbound::Received(message));

        assert_eq!(plan, vec![chat(1, 11, "Ann", "yo"), chat(2, 22, "Ann", "yo")]);
    }

    #[test]
    fn test_administration_bypasses_table() {
        let (router, _, _) = router(&two_nodes());
        let message = CanonicalMessage::new(
            Origin::GameChatAdministration,
            "none",
            "none",
            "Administration",
            "behave",
            None,
        );
        let plan = router.plan_hub_event(&HubInbound::ReceivedFromAdministration {
            message,
            target_user_id: 777,
        });

        assert_eq!(
            plan,
            vec![Dispatch::Direct {
                user_id: 777,
                user_name: "Administration".to_string(),
                text: "behave".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_run_dispatches_until_shutdown() {
        let (router, guild, hub) = router(&two_nodes());
        let (guild_tx, guild_rx) = mpsc::unbounded_channel();
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(router.run(guild_rx, hub_rx, shutdown_rx));

        guild_tx.send(guild_message(1, 11)).unwrap();
        guild_tx.send(guild_message(3, 33)).unwrap();
        hub_tx
            .send(HubInbound::ReceivedFromAdministration {
                message: CanonicalMessage::new(
                    Origin::GameChatAdministration,
                    "none",
                    "none",
                    "Administration",
                    "hello",
                    None,
                ),
                target_user_id: 5,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let sends = guild.sends.lock().unwrap().clone();
        assert_eq!(sends.len(), 2);
        assert!(sends.contains(&chat(2, 22, "Bob", "hi")));
        assert!(sends
            .iter()
            .any(|s| matches!(s, Dispatch::Direct { user_id: 5, .. })));
        assert_eq!(hub.pulled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_ends_when_streams_close() {
        let (router, _, _) = router(&[]);
        let (guild_tx, guild_rx) = mpsc::unbounded_channel::<GuildMessage>();
        let (hub_tx, hub_rx) = mpsc::unbounded_channel::<HubInbound>();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(guild_tx);
        drop(hub_tx);
        tokio::time::timeout(Duration::from_secs(1), router.run(guild_rx, hub_rx, shutdown_rx))
            .await
            .unwrap();
    }
}
