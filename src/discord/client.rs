//! Discord guild connection.
//!
//! Wraps the serenity client behind the relay's connection contract:
//! `connect` runs the gateway event pump until the session ends, relayable
//! messages go out on the guild events channel, and the `GuildOutlet`
//! impl posts formatted messages back into channels and DMs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serenity::async_trait;
use serenity::gateway::{ConnectionStage, ShardManager, ShardStageUpdateEvent};
use serenity::http::{Http, HttpBuilder};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, UserId};
use serenity::prelude::*;
use serenity::utils::{content_safe, ContentSafeOptions};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::{GuildOutlet, RoutingTable};
use crate::common::error::DiscordError;
use crate::common::reconnect::guild_backoff;
use crate::common::{ConnectionState, GuildMessage};
use crate::discord::commands::{is_admin_command, AdminCommands};
use crate::discord::format::{format_chunks, ChatStyle};

/// Upper bound used when the backoff iterator runs dry.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Whether a guild message should become a relay event.
///
/// Rejects the bot's own messages, command-prefixed text and empty text.
pub fn should_relay(author_id: u64, bot_id: u64, content: &str) -> bool {
    if bot_id != 0 && author_id == bot_id {
        return false;
    }
    let content = content.trim();
    !content.is_empty() && !content.starts_with('!')
}

fn build_http(token: &str) -> anyhow::Result<Http> {
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    Ok(HttpBuilder::new(token).client(reqwest_client).build())
}

/// Serenity event handler feeding the relay.
struct GuildEvents {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    bot_id: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<GuildMessage>,
    commands: Arc<AdminCommands>,
}

#[async_trait]
impl EventHandler for GuildEvents {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.bot_id.store(ready.user.id.get(), Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Connected);
        info!(
            guilds = ready.guilds.len(),
            "Discord bot connected as {}", ready.user.name
        );
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        debug!(old = ?event.old, new = ?event.new, "Discord shard stage changed");
        match event.new {
            ConnectionStage::Connected => {
                self.state_tx.send_replace(ConnectionState::Connected);
            }
            ConnectionStage::Disconnected => {
                warn!("Discord gateway connection closed");
                self.state_tx.send_replace(ConnectionState::Disconnected);
            }
            _ => {}
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Only guild (server) messages are bridged
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let bot_id = match self.bot_id.load(Ordering::SeqCst) {
            0 => ctx.cache.current_user().id.get(),
            id => id,
        };
        if msg.author.id.get() == bot_id {
            return;
        }

        if is_admin_command(&msg.content) {
            self.commands.handle(&ctx, &msg).await;
            return;
        }

        if !should_relay(msg.author.id.get(), bot_id, &msg.content) {
            return;
        }

        let content = content_safe(
            &ctx.cache,
            &msg.content,
            &ContentSafeOptions::default(),
            &msg.mentions,
        );
        let author_name = msg
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        let message = GuildMessage {
            server_id: guild_id.get(),
            channel_id: msg.channel_id.get(),
            author_id: msg.author.id.get(),
            author_name,
            content,
            timestamp: DateTime::<Utc>::from_timestamp(msg.timestamp.unix_timestamp(), 0),
        };

        if let Err(e) = self.events_tx.send(message) {
            warn!("Failed to publish guild message: {}", e);
        }
    }
}

/// Connection to the Discord guild platform.
pub struct GuildConnection {
    token: String,
    /// Used for relay sends; independent of the gateway session.
    http: Arc<Http>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    bot_id: Arc<AtomicU64>,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
    events_tx: mpsc::UnboundedSender<GuildMessage>,
    commands: Arc<AdminCommands>,
}

impl GuildConnection {
    pub fn new(
        token: &str,
        events_tx: mpsc::UnboundedSender<GuildMessage>,
        commands: AdminCommands,
    ) -> anyhow::Result<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            token: token.to_string(),
            http: Arc::new(build_http(token)?),
            state_tx: Arc::new(state_tx),
            bot_id: Arc::new(AtomicU64::new(0)),
            shard_manager: Mutex::new(None),
            events_tx,
            commands: Arc::new(commands),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run the gateway session. Returns only when the session ends.
    ///
    /// A no-op when already connected; otherwise any previous session is
    /// torn down first.
    pub async fn connect(&self) -> anyhow::Result<()> {
        if self.state() == ConnectionState::Connected {
            debug!("Discord already connected");
            return Ok(());
        }

        self.disconnect().await;
        self.state_tx.send_replace(ConnectionState::Connecting);

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let events = GuildEvents {
            state_tx: Arc::clone(&self.state_tx),
            bot_id: Arc::clone(&self.bot_id),
            events_tx: self.events_tx.clone(),
            commands: Arc::clone(&self.commands),
        };

        let built = async {
            let http = build_http(&self.token)?;
            let client = serenity::client::ClientBuilder::new_with_http(http, intents)
                .event_handler(events)
                .await?;
            Ok::<_, anyhow::Error>(client)
        }
        .await;
        let mut client = match built {
            Ok(client) => client,
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        *self
            .shard_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&client.shard_manager));

        info!("Connecting to Discord...");
        let result = client.start().await;

        self.shard_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        result.map_err(Into::into)
    }

    /// Shut the gateway session down. Safe when not connected.
    pub async fn disconnect(&self) {
        let manager = self
            .shard_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(manager) = manager {
            info!("Initiating graceful Discord shutdown...");
            manager.shutdown_all().await;
            info!("Discord shutdown complete");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Keep the guild session alive until shutdown.
    ///
    /// Reloads the routing table before every attempt and waits with
    /// exponential backoff between attempts.
    pub async fn run(&self, table: Arc<RoutingTable>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff = guild_backoff();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = table.reload() {
                error!("Failed to reload routing table: {}", e);
            }

            tokio::select! {
                result = self.connect() => match result {
                    Ok(()) => {
                        info!("Discord client disconnected normally");
                        backoff = guild_backoff();
                    }
                    Err(e) => error!("Discord client error: {}", e),
                },
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }

            let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
            warn!("Discord disconnected. Reconnecting in {:.1}s...", delay.as_secs_f64());
            tokio::select! {
                _ = sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }
        }

        self.disconnect().await;
        info!("Discord task ended");
    }

    fn http_status(error: &serenity::Error) -> Option<u16> {
        match error {
            serenity::Error::Http(http_error) => {
                http_error.status_code().map(|status| status.as_u16())
            }
            _ => None,
        }
    }
}

/// A 403 on either DM step means the user blocks DMs from the bot.
fn direct_error(user_id: u64, status: Option<u16>, error: serenity::Error) -> DiscordError {
    if status == Some(403) {
        DiscordError::UserUnreachable { user_id }
    } else {
        error.into()
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            // Sender gone; nobody can signal shutdown any more.
            std::future::pending::<()>().await;
        }
    }
}

impl GuildConnection {
    async fn deliver_chat(
        &self,
        channel_id: u64,
        user_name: &str,
        text: &str,
    ) -> Result<(), DiscordError> {
        if channel_id == 0 {
            return Err(DiscordError::ChannelNotFound { channel_id });
        }
        let channel = ChannelId::new(channel_id);

        for chunk in format_chunks(user_name, text, ChatStyle::Normal) {
            channel.say(&self.http, chunk).await?;
        }
        Ok(())
    }

    async fn deliver_direct(
        &self,
        user_id: u64,
        user_name: &str,
        text: &str,
    ) -> Result<(), DiscordError> {
        if user_id == 0 {
            return Err(DiscordError::UserUnreachable { user_id });
        }
        let dm = UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(|e| direct_error(user_id, Self::http_status(&e), e))?;

        for chunk in format_chunks(user_name, text, ChatStyle::Direct) {
            dm.say(&self.http, chunk)
                .await
                .map_err(|e| direct_error(user_id, Self::http_status(&e), e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl GuildOutlet for GuildConnection {
    async fn send_chat(&self, server_id: u64, channel_id: u64, user_name: &str, text: &str) {
        if let Err(e) = self.deliver_chat(channel_id, user_name, text).await {
            warn!(server_id, channel_id, "Failed to relay message to channel: {}", e);
        }
    }

    async fn send_direct(&self, user_id: u64, user_name: &str, text: &str) {
        match self.deliver_direct(user_id, user_name, text).await {
            Ok(()) => info!(user_id, "Administration -> Discord direct message delivered"),
            Err(e) => warn!(user_id, "Failed to send direct message: {}", e),
        }
    }
}
