//! Relay channel management.
//!
//! Each platform connection gets one long-lived sender for its receipt
//! events; the router owns the matching receivers. Reconnects keep
//! producing onto the same channels.

use tokio::sync::{mpsc, watch};

use crate::common::{GuildMessage, HubInbound};

/// Channels for the guild connection.
pub struct GuildChannels {
    /// Sender for relayable guild messages.
    pub events_tx: mpsc::UnboundedSender<GuildMessage>,
}

/// Channels for the hub connection.
pub struct HubChannels {
    /// Sender for hub receipt events.
    pub events_tx: mpsc::UnboundedSender<HubInbound>,
}

/// Channels consumed by the router.
pub struct RouterChannels {
    pub guild_rx: mpsc::UnboundedReceiver<GuildMessage>,
    pub hub_rx: mpsc::UnboundedReceiver<HubInbound>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels wiring the connections to the router.
pub struct ChannelBundle {
    pub guild: GuildChannels,
    pub hub: HubChannels,
    pub router: RouterChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (guild_tx, guild_rx) = mpsc::unbounded_channel();
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            guild: GuildChannels {
                events_tx: guild_tx,
            },
            hub: HubChannels { events_tx: hub_tx },
            router: RouterChannels {
                guild_rx,
                hub_rx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
