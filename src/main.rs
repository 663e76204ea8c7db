//! Transmitter - Discord <-> game chat hub relay
//!
//! Relays messages between bridged Discord channels and the game's live
//! chat hub, in both directions, with per-channel direction policies.

mod bridge;
mod common;
mod config;
mod discord;
mod hub;
mod protocol;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge::{Administration, ChannelBundle, Router, RoutingTable, SqliteNodeStore};
use common::{ConnectionState, Origin};
use config::{env::get_config_path, load_and_validate};
use discord::{AdminCommands, GuildConnection};
use hub::{outbound_queue, HubConnection, HubCredentials, HubSettings, SignalRTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Transmitter v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    let origin = Origin::from_code(&config.discord.origin);
    info!("Configuration loaded successfully");
    info!("  Origin: {}", origin.full_name());
    info!("  Hub: {}", config.hub.url);
    info!("  Database: {}", config.storage.database);

    // ============================================================
    // Routing table
    // ============================================================
    let store = Arc::new(SqliteNodeStore::open(&config.storage.database)?);
    let table = Arc::new(RoutingTable::load(store)?);
    if table.is_empty() {
        warn!("No transmit nodes configured yet - use the admin commands to bridge channels");
    } else {
        info!("  Nodes: {}", table.len());
    }

    let channels = ChannelBundle::new();
    let shutdown_tx = channels.control.shutdown_tx;

    // ============================================================
    // Hub connection and outbound drain loop
    // ============================================================
    let (queue, drain) = outbound_queue(config.relay.drain_interval());
    let transport = Arc::new(SignalRTransport::new(
        config.hub.hub_name.clone(),
        config.hub.handshake_timeout(),
        config.hub.invoke_timeout(),
    )?);
    let hub = Arc::new(HubConnection::new(
        HubCredentials {
            url: config.hub.url.clone(),
            api_key: config.hub.api_key.clone(),
            api_secret: config.hub.api_secret.clone(),
        },
        HubSettings::from_config(&config.hub),
        transport,
        channels.hub.events_tx,
        queue,
    ));
    let drain_task = hub.spawn_drain(drain);
    spawn_state_logger("hub", hub.subscribe_state());

    let hub_connect = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(e) = hub.connect().await {
                error!("Hub connect failed: {}", e);
            }
        })
    };

    // ============================================================
    // Guild connection and router
    // ============================================================
    let commands = AdminCommands::new(
        Administration::new(Arc::clone(&table)),
        config.discord.admins.clone(),
    );
    let guild = Arc::new(GuildConnection::new(
        &config.discord.token,
        channels.guild.events_tx,
        commands,
    )?);
    spawn_state_logger("discord", guild.subscribe_state());

    let router = Router::new(Arc::clone(&table), Arc::clone(&guild), Arc::clone(&hub), origin);
    let router_task = tokio::spawn(router.run(
        channels.router.guild_rx,
        channels.router.hub_rx,
        channels.router.shutdown_rx,
    ));

    info!("Starting Discord bot...");
    let mut guild_task = {
        let guild = Arc::clone(&guild);
        let table = Arc::clone(&table);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { guild.run(table, shutdown_rx).await })
    };

    // ============================================================
    // Run until shutdown
    // ============================================================
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping relay...");
            true
        }
        _ = &mut guild_task => false,
        _ = router_task => false,
        _ = drain_task => false,
    };

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed: {}", e);
    }
    hub_connect.abort();
    hub.shutdown().await;

    if shutdown {
        let timeout = tokio::time::Duration::from_secs(5);
        match tokio::time::timeout(timeout, guild_task).await {
            Ok(Ok(())) => info!("Discord disconnected gracefully"),
            Ok(Err(e)) => warn!("Discord task panicked: {}", e),
            Err(_) => warn!("Discord shutdown timed out"),
        }
    } else {
        error!("A relay task ended unexpectedly");
        guild.disconnect().await;
    }

    info!(hub = %hub.state(), "Exiting...");
    Ok(())
}

/// Log every state transition of a platform connection.
fn spawn_state_logger(name: &'static str, mut state_rx: watch::Receiver<ConnectionState>) {
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            if state.is_live() {
                info!(connection = name, %state, "Connection state changed");
            } else {
                warn!(connection = name, %state, "Connection state changed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
