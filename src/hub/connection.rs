//! Game chat hub connection.
//!
//! Owns the hub connection state. `connect` retries the handshake with a
//! fixed delay until it succeeds, then a supervisor task pumps link events
//! and re-establishes the session whenever the link closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::HubOutlet;
use crate::common::error::{HubError, HubResult};
use crate::common::messages::ADMINISTRATION_NAME;
use crate::common::reconnect::hub_retry;
use crate::common::{CanonicalMessage, ConnectionState, HubInbound, Origin, OutboundGameMessage};
use crate::config::types::HubConfig;
use crate::protocol::HubChatMessage;

use super::queue::{OutboundDrain, OutboundQueue, OutboundSink};
use super::transport::{HubCredentials, HubLink, HubSession, HubTransport, LinkEvent};

/// Hub method names and retry tuning.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub push_method: String,
    pub receive_method: String,
    pub push_channel: String,
    pub retry_delay: Duration,
}

impl HubSettings {
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            push_method: config.push_method.clone(),
            receive_method: config.receive_method.clone(),
            push_channel: config.push_channel.clone(),
            retry_delay: config.retry_delay(),
        }
    }
}

struct HubShared {
    credentials: HubCredentials,
    settings: HubSettings,
    transport: Arc<dyn HubTransport>,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<Arc<dyn HubLink>>>,
    events_tx: mpsc::UnboundedSender<HubInbound>,
    queue: OutboundQueue,
    stopping: AtomicBool,
}

/// Handle to the hub connection. Clones share one connection.
#[derive(Clone)]
pub struct HubConnection {
    inner: Arc<HubShared>,
}

impl HubConnection {
    pub fn new(
        credentials: HubCredentials,
        settings: HubSettings,
        transport: Arc<dyn HubTransport>,
        events_tx: mpsc::UnboundedSender<HubInbound>,
        queue: OutboundQueue,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(HubShared {
                credentials,
                settings,
                transport,
                state_tx,
                link: Mutex::new(None),
                events_tx,
                queue,
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Establish the hub session, retrying until it succeeds.
    ///
    /// Fails with `AlreadyConnected` if a session is live or coming up.
    pub async fn connect(&self) -> HubResult<()> {
        if !self.inner.claim(ConnectionState::Disconnected)
            && !self.inner.claim(ConnectionState::Reconnecting)
        {
            return Err(HubError::AlreadyConnected);
        }

        if let Some(session) = self.inner.establish().await {
            tokio::spawn(supervise(Arc::clone(&self.inner), session));
        }
        Ok(())
    }

    /// Start the outbound drain loop against this connection.
    pub fn spawn_drain(&self, drain: OutboundDrain) -> JoinHandle<()> {
        let sink: Arc<dyn OutboundSink> = self.inner.clone();
        tokio::spawn(drain.run(sink))
    }

    /// Close the link for good. No reconnect follows.
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let link = self.inner.take_link();
        if let Some(link) = link {
            link.close().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!("Hub connection stopped");
    }
}

impl HubOutlet for HubConnection {
    fn pull_message(&self, message: OutboundGameMessage) {
        self.inner.queue.enqueue(message);
    }
}

impl HubShared {
    /// Move from `from` to `Connecting`. False if the state was anything else.
    fn claim(&self, from: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(%previous, %state, "Hub connection state changed");
        }
    }

    fn take_link(&self) -> Option<Arc<dyn HubLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn current_link(&self) -> Option<Arc<dyn HubLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Retry loop. Returns `None` only when shutting down.
    async fn establish(&self) -> Option<HubSession> {
        for delay in hub_retry(self.settings.retry_delay) {
            if self.stopping.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return None;
            }

            info!("Starting hub connection");
            match self.transport.open(&self.credentials).await {
                Ok(session) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        session.link.close().await;
                        self.set_state(ConnectionState::Disconnected);
                        return None;
                    }
                    *self.link.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::clone(&session.link));
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to game chat hub");
                    return Some(session);
                }
                Err(e) => {
                    error!("Hub connection failed: {}", e);
                    info!("Retrying hub connection in {:?}", delay);
                    sleep(delay).await;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        None
    }

    fn handle_invocation(&self, target: &str, arguments: Vec<Value>) {
        if !target.eq_ignore_ascii_case(&self.settings.receive_method) {
            debug!(method = target, "Ignoring hub invocation");
            return;
        }

        let mut arguments = arguments.into_iter();
        let channel = arguments
            .next()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let message = match arguments.next().map(serde_json::from_value::<HubChatMessage>) {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("Malformed hub chat message: {}", e);
                return;
            }
            None => {
                warn!(method = target, "Hub invocation without a message argument");
                return;
            }
        };

        debug!(message_id = ?message.id, %channel, "Hub chat message received");
        if let Some(event) = translate_inbound(&self.credentials.api_key, &channel, message) {
            if let Err(e) = self.events_tx.send(event) {
                warn!("Failed to publish hub event: {}", e);
            }
        }
    }
}

#[async_trait]
impl OutboundSink for HubShared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    async fn deliver(&self, message: &OutboundGameMessage) -> HubResult<()> {
        let link = self.current_link().ok_or(HubError::NotConnected)?;
        let arguments = vec![
            json!(self.settings.push_channel),
            serde_json::to_value(message)?,
        ];
        link.invoke(&self.settings.push_method, arguments).await
    }
}

/// Pump link events; on close, re-establish unless shutting down.
async fn supervise(shared: Arc<HubShared>, session: HubSession) {
    let mut events = session.events;

    loop {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Invocation { target, arguments } => {
                    shared.handle_invocation(&target, arguments)
                }
                LinkEvent::Closed { error } => {
                    match error {
                        Some(error) => warn!("Hub connection closed: {}", error),
                        None => warn!("Hub connection closed"),
                    }
                    break;
                }
            }
        }

        shared.take_link();
        if shared.stopping.load(Ordering::SeqCst) {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        shared.set_state(ConnectionState::Reconnecting);
        warn!("Reconnecting to game chat hub");
        if !shared.claim(ConnectionState::Reconnecting) {
            debug!("Hub reconnect already claimed elsewhere");
            return;
        }
        match shared.establish().await {
            Some(session) => events = session.events,
            None => return,
        }
    }
}

/// Turn a hub chat message into a receipt event.
///
/// Returns `None` for our own echoes and for unusable direct messages.
pub fn translate_inbound(api_key: &str, channel: &str, message: HubChatMessage) -> Option<HubInbound> {
    if message.source.as_deref() == Some(api_key) {
        return None;
    }

    let text = message.text.clone().unwrap_or_default();

    if let Some(target) = message
        .target_user_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return match target.parse::<u64>() {
            Ok(target_user_id) => Some(HubInbound::ReceivedFromAdministration {
                message: CanonicalMessage::new(
                    Origin::GameChatAdministration,
                    "none",
                    "none",
                    ADMINISTRATION_NAME,
                    text,
                    Some(Utc::now()),
                ),
                target_user_id,
            }),
            Err(_) => {
                warn!(target_user_id = target, "Administrative message with invalid target user id");
                None
            }
        };
    }

    let timestamp = message.timestamp();
    Some(HubInbound::Received(CanonicalMessage::new(
        Origin::GameChat,
        message.channel_name.unwrap_or_else(|| channel.to_string()),
        message.uber_id.unwrap_or_default(),
        message.player_name.unwrap_or_default(),
        text,
        timestamp,
    )))
}
