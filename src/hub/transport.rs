//! Duplex transport to the game chat hub.
//!
//! `HubTransport::open` performs one connection attempt and hands back a
//! `HubSession`: a link for outbound invocations plus a stream of link
//! events. Retrying is the caller's business.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::common::error::{HubError, HubResult};
use crate::protocol::signalr::{self, HubFrame};

/// Upper bound for the best-effort `abort` call on close.
const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Hub address and authentication.
#[derive(Debug, Clone)]
pub struct HubCredentials {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Events raised by an open hub link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The server invoked a client method.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    /// The link is gone. Always the last event.
    Closed { error: Option<String> },
}

/// Outbound half of an open link.
#[async_trait]
pub trait HubLink: Send + Sync {
    /// Invoke a hub method and wait for its completion.
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> HubResult<()>;

    /// Ask the link to close. A `Closed` event follows.
    async fn close(&self);
}

/// Result of one successful connection attempt.
pub struct HubSession {
    pub link: Arc<dyn HubLink>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn open(&self, credentials: &HubCredentials) -> HubResult<HubSession>;
}

/// ASP.NET SignalR 2 hub over WebSocket.
pub struct SignalRTransport {
    http: reqwest::Client,
    hub_name: String,
    handshake_timeout: Duration,
    invoke_timeout: Duration,
}

impl SignalRTransport {
    pub fn new(
        hub_name: impl Into<String>,
        handshake_timeout: Duration,
        invoke_timeout: Duration,
    ) -> HubResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(handshake_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            hub_name: hub_name.into(),
            handshake_timeout,
            invoke_timeout,
        })
    }

    async fn get(&self, url: Url, credentials: &HubCredentials) -> HubResult<String> {
        let body = self
            .http
            .get(url)
            .header("ApiKey", credentials.api_key.as_str())
            .header("ApiSecret", credentials.api_secret.as_str())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    /// negotiate, connect, wait for init, start.
    async fn handshake(
        &self,
        base: &Url,
        credentials: &HubCredentials,
    ) -> HubResult<(WsStream, signalr::NegotiateResponse, Vec<HubFrame>)> {
        let body = self
            .get(signalr::negotiate_url(base, &self.hub_name)?, credentials)
            .await?;
        let negotiation = signalr::parse_negotiate_response(&body)?;
        if !negotiation.allows_websockets() {
            return Err(HubError::Handshake {
                message: "server does not accept WebSockets".to_string(),
            });
        }
        debug!(
            connection_id = ?negotiation.connection_id,
            protocol = ?negotiation.protocol_version,
            "Hub negotiated"
        );

        let url = signalr::connect_url(base, &self.hub_name, &negotiation.connection_token)?;
        let (mut ws, _response) =
            tokio_tungstenite::connect_async(websocket_request(&url, credentials)?).await?;
        let early = wait_for_init(&mut ws).await?;

        let body = self
            .get(
                signalr::start_url(base, &self.hub_name, &negotiation.connection_token)?,
                credentials,
            )
            .await?;
        signalr::parse_start_response(&body)?;

        Ok((ws, negotiation, early))
    }
}

/// WebSocket upgrade request carrying the hub credentials.
fn websocket_request(url: &Url, credentials: &HubCredentials) -> HubResult<Request> {
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        "ApiKey",
        HeaderValue::from_str(&credentials.api_key)
            .map_err(|_| HubError::InvalidHeader { header: "ApiKey" })?,
    );
    headers.insert(
        "ApiSecret",
        HeaderValue::from_str(&credentials.api_secret)
            .map_err(|_| HubError::InvalidHeader { header: "ApiSecret" })?,
    );
    Ok(request)
}

#[async_trait]
impl HubTransport for SignalRTransport {
    async fn open(&self, credentials: &HubCredentials) -> HubResult<HubSession> {
        let base = signalr::base_url(&credentials.url)?;

        debug!(url = %base, hub = %self.hub_name, "Opening hub connection");
        let (ws, negotiation, early) =
            tokio::time::timeout(self.handshake_timeout, self.handshake(&base, credentials))
                .await
                .map_err(|_| HubError::HandshakeTimeout)??;

        let abort = AbortCall {
            http: self.http.clone(),
            url: signalr::abort_url(&base, &self.hub_name, &negotiation.connection_token)?,
            credentials: credentials.clone(),
        };
        info!(url = %base, "Hub connection started");

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(read_loop(
            stream,
            early,
            ReadContext {
                hub_name: self.hub_name.clone(),
                keep_alive: negotiation.keep_alive_timeout(),
            },
            Arc::clone(&pending),
            events_tx,
            out_tx.clone(),
        ));

        let link = SignalRLink {
            hub_name: self.hub_name.clone(),
            out_tx,
            pending,
            next_id: AtomicU64::new(0),
            invoke_timeout: self.invoke_timeout,
            abort: Some(abort),
        };
        Ok(HubSession {
            link: Arc::new(link),
            events: events_rx,
        })
    }
}

/// Read until the server's init message. Returns every frame seen,
/// the init message included.
async fn wait_for_init(ws: &mut WsStream) -> HubResult<Vec<HubFrame>> {
    let mut early = Vec::new();
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = signalr::decode_frame(&text)?;
                let initialized = matches!(
                    frame,
                    HubFrame::Messages {
                        initialized: true,
                        ..
                    }
                );
                early.push(frame);
                if initialized {
                    return Ok(early);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(HubError::Handshake {
                    message: format!("server closed before init: {:?}", frame),
                })
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(HubError::Handshake {
                    message: "connection ended before init".to_string(),
                })
            }
        }
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut out_rx: mpsc::UnboundedReceiver<Outgoing>) {
    loop {
        match out_rx.recv().await {
            Some(Outgoing::Frame(frame)) => {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!("Hub write failed: {}", e);
                    break;
                }
            }
            Some(Outgoing::Close) | None => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
    debug!("Hub writer stopped");
}

struct ReadContext {
    hub_name: String,
    /// Silence longer than this ends the link.
    keep_alive: Option<Duration>,
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    early: Vec<HubFrame>,
    context: ReadContext,
    pending: PendingMap,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    out_tx: mpsc::UnboundedSender<Outgoing>,
) {
    let mut close_error = None;

    let mut closed = early
        .into_iter()
        .any(|frame| handle_frame(frame, &context.hub_name, &pending, &events_tx, &mut close_error));

    while !closed {
        let next = match context.keep_alive {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    close_error = Some(format!("no keep-alive from hub for {:?}", limit));
                    break;
                }
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => match signalr::decode_frame(&text) {
                Ok(frame) => {
                    closed = handle_frame(frame, &context.hub_name, &pending, &events_tx, &mut close_error)
                }
                Err(e) => warn!("Undecodable hub frame: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                debug!("Hub websocket closed: {:?}", frame);
                closed = true;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                close_error = Some(e.to_string());
                closed = true;
            }
            None => closed = true,
        }
    }

    // Dropping the senders fails every outstanding invocation.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    let _ = out_tx.send(Outgoing::Close);
    let _ = events_tx.send(LinkEvent::Closed { error: close_error });
}

/// Returns true when the frame ends the link.
fn handle_frame(
    frame: HubFrame,
    hub_name: &str,
    pending: &PendingMap,
    events_tx: &mpsc::UnboundedSender<LinkEvent>,
    close_error: &mut Option<String>,
) -> bool {
    let ends_link = frame.ends_link();

    match frame {
        HubFrame::KeepAlive => false,
        HubFrame::Result {
            invocation_id,
            error,
        } => {
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&invocation_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(error.map_or(Ok(()), Err));
                }
                None => debug!(%invocation_id, "Result for unknown invocation"),
            }
            false
        }
        HubFrame::Messages {
            disconnect,
            invocations,
            ..
        } => {
            for invocation in invocations {
                if invocation.hub.eq_ignore_ascii_case(hub_name) {
                    let _ = events_tx.send(LinkEvent::Invocation {
                        target: invocation.method,
                        arguments: invocation.arguments,
                    });
                } else {
                    debug!(hub = %invocation.hub, method = %invocation.method, "Ignoring call for another hub");
                }
            }

            if ends_link {
                let reason = if disconnect {
                    "server requested disconnect"
                } else {
                    "server requested reconnect"
                };
                *close_error = Some(reason.to_string());
            }
            ends_link
        }
    }
}

/// `abort` request telling the server the connection is gone for good.
struct AbortCall {
    http: reqwest::Client,
    url: Url,
    credentials: HubCredentials,
}

impl AbortCall {
    async fn send(&self) {
        let request = self
            .http
            .post(self.url.clone())
            .header("ApiKey", self.credentials.api_key.as_str())
            .header("ApiSecret", self.credentials.api_secret.as_str())
            .send();
        match tokio::time::timeout(ABORT_TIMEOUT, request).await {
            Ok(Ok(response)) => debug!(status = %response.status(), "Hub abort sent"),
            Ok(Err(e)) => debug!("Hub abort failed: {}", e),
            Err(_) => debug!("Hub abort timed out"),
        }
    }
}

struct SignalRLink {
    hub_name: String,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    pending: PendingMap,
    next_id: AtomicU64,
    invoke_timeout: Duration,
    abort: Option<AbortCall>,
}

impl SignalRLink {
    fn forget(&self, invocation_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(invocation_id);
    }
}

#[async_trait]
impl HubLink for SignalRLink {
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> HubResult<()> {
        let invocation_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(invocation_id.clone(), tx);

        let frame = signalr::encode_invocation(&self.hub_name, target, &arguments, &invocation_id);
        if self.out_tx.send(Outgoing::Frame(frame)).is_err() {
            self.forget(&invocation_id);
            return Err(HubError::NotConnected);
        }

        match tokio::time::timeout(self.invoke_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(HubError::Invocation {
                target: target.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(HubError::NotConnected),
            Err(_) => {
                self.forget(&invocation_id);
                Err(HubError::InvocationTimeout {
                    target: target.to_string(),
                })
            }
        }
    }

    async fn close(&self) {
        if let Some(abort) = &self.abort {
            abort.send().await;
        }
        let _ = self.out_tx.send(Outgoing::Close);
    }
}
