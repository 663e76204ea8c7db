//! ASP.NET SignalR 2 hub protocol.
//!
//! A session is set up in three steps over the hub's base url:
//! `negotiate` (HTTP) hands out a connection token, `connect` upgrades to a
//! WebSocket carrying that token, and `start` (HTTP) confirms the
//! transport once the server has sent its init message. Every WebSocket
//! text message is one JSON object:
//!
//! - `{}`: keep-alive
//! - `{"C":cursor,"S":1,"M":[{"H":hub,"M":method,"A":[..]}, ..]}`: server
//!   invocations, `S` set on the init message, `T`/`D` asking the client to
//!   reconnect or disconnect
//! - `{"I":id,"R":result}` / `{"I":id,"E":error}`: result of a client call
//!
//! Client calls are sent as `{"H":hub,"M":method,"A":[..],"I":id}`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::common::error::{HubError, HubResult};

/// Protocol revision spoken by this client.
pub const CLIENT_PROTOCOL: &str = "1.5";

/// Path segment appended to the configured url, as the stock client does.
pub const DEFAULT_PATH: &str = "signalr";

const TRANSPORT: &str = "webSockets";

/// Answer to `negotiate`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    pub connection_token: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Seconds without any frame before the link counts as dead. Absent or
    /// null disables keep-alive.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,
    #[serde(default)]
    pub try_web_sockets: Option<bool>,
}

impl NegotiateResponse {
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn allows_websockets(&self) -> bool {
        self.try_web_sockets.unwrap_or(true)
    }
}

/// One server-to-client hub call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInvocation {
    pub hub: String,
    pub method: String,
    pub arguments: Vec<Value>,
}

/// Decoded WebSocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    KeepAlive,
    /// Persistent connection payload.
    Messages {
        /// Set on the first message after `connect`.
        initialized: bool,
        /// Server asks the client to reconnect.
        reconnect: bool,
        /// Server asks the client to go away.
        disconnect: bool,
        invocations: Vec<ServerInvocation>,
    },
    /// Result of a client invocation.
    Result {
        invocation_id: String,
        error: Option<String>,
    },
}

impl HubFrame {
    /// Whether the server wants this link gone.
    pub fn ends_link(&self) -> bool {
        matches!(
            self,
            Self::Messages {
                reconnect: true,
                ..
            } | Self::Messages {
                disconnect: true,
                ..
            }
        )
    }
}

/// `[{"name":"chathub"}]`
pub fn connection_data(hub_name: &str) -> String {
    json!([{ "name": hub_name }]).to_string()
}

/// Normalise the configured hub url to the protocol's base url.
///
/// http(s) and ws(s) are both accepted; the base is always http(s) and
/// ends in `/signalr/`.
pub fn base_url(raw: &str) -> HubResult<Url> {
    let invalid = |message: String| HubError::InvalidUrl {
        url: raw.to_string(),
        message,
    };

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot rewrite scheme".to_string()))?;
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    let last = path.rsplit('/').next().unwrap_or_default();
    let path = if last.eq_ignore_ascii_case(DEFAULT_PATH) {
        format!("{}/", path)
    } else {
        format!("{}/{}/", path, DEFAULT_PATH)
    };
    url.set_path(&path);
    Ok(url)
}

fn endpoint(base: &Url, action: &str, hub_name: &str, connection_token: Option<&str>) -> HubResult<Url> {
    let mut url = base.join(action).map_err(|e| HubError::InvalidUrl {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    {
        let mut query = url.query_pairs_mut();
        if connection_token.is_some() {
            query.append_pair("transport", TRANSPORT);
        }
        query.append_pair("clientProtocol", CLIENT_PROTOCOL);
        if let Some(token) = connection_token {
            query.append_pair("connectionToken", token);
        }
        query.append_pair("connectionData", &connection_data(hub_name));
    }
    Ok(url)
}

pub fn negotiate_url(base: &Url, hub_name: &str) -> HubResult<Url> {
    endpoint(base, "negotiate", hub_name, None)
}

/// WebSocket url for `connect`.
pub fn connect_url(base: &Url, hub_name: &str, connection_token: &str) -> HubResult<Url> {
    let mut url = endpoint(base, "connect", hub_name, Some(connection_token))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| HubError::InvalidUrl {
        url: base.to_string(),
        message: "cannot rewrite scheme".to_string(),
    })?;
    Ok(url)
}

pub fn start_url(base: &Url, hub_name: &str, connection_token: &str) -> HubResult<Url> {
    endpoint(base, "start", hub_name, Some(connection_token))
}

pub fn abort_url(base: &Url, hub_name: &str, connection_token: &str) -> HubResult<Url> {
    endpoint(base, "abort", hub_name, Some(connection_token))
}

pub fn parse_negotiate_response(body: &str) -> HubResult<NegotiateResponse> {
    serde_json::from_str(body).map_err(|e| HubError::Handshake {
        message: format!("malformed negotiate response: {}", e),
    })
}

/// `start` answers `{"Response":"started"}`.
pub fn parse_start_response(body: &str) -> HubResult<()> {
    let value: Value = serde_json::from_str(body).map_err(|e| HubError::Handshake {
        message: format!("malformed start response: {}", e),
    })?;
    match value.get("Response").and_then(Value::as_str) {
        Some("started") => Ok(()),
        other => Err(HubError::Handshake {
            message: format!("transport not started: {:?}", other),
        }),
    }
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    match object.get(key) {
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decode one WebSocket text message.
pub fn decode_frame(frame: &str) -> HubResult<HubFrame> {
    let value: Value = serde_json::from_str(frame)?;
    let object = value.as_object().ok_or_else(|| HubError::Protocol {
        message: "frame is not an object".to_string(),
    })?;

    if object.is_empty() {
        return Ok(HubFrame::KeepAlive);
    }

    if !object.contains_key("C") && !object.contains_key("M") {
        if let Some(invocation_id) = text(object, "I") {
            return Ok(HubFrame::Result {
                invocation_id,
                error: text(object, "E"),
            });
        }
    }

    let invocations = object
        .get("M")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|message| {
                    Some(ServerInvocation {
                        hub: text(message, "H")?,
                        method: text(message, "M")?,
                        arguments: message
                            .get("A")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(HubFrame::Messages {
        initialized: flag(object, "S"),
        reconnect: flag(object, "T"),
        disconnect: flag(object, "D"),
        invocations,
    })
}

/// Encode a client hub call.
pub fn encode_invocation(hub_name: &str, method: &str, arguments: &[Value], invocation_id: &str) -> String {
    json!({
        "H": hub_name,
        "M": method,
        "A": arguments,
        "I": invocation_id,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        base_url("https://chat.example.com").unwrap()
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_base_url_appends_default_path() {
        assert_eq!(base().as_str(), "https://chat.example.com/signalr/");
        assert_eq!(
            base_url("http://localhost:5000/signalr").unwrap().as_str(),
            "http://localhost:5000/signalr/"
        );
        assert_eq!(
            base_url("wss://chat.example.com/pa/").unwrap().as_str(),
            "https://chat.example.com/pa/signalr/"
        );
    }

    #[test]
    fn test_base_url_rejects_bad_input() {
        assert!(matches!(
            base_url("ftp://chat.example.com"),
            Err(HubError::InvalidUrl { .. })
        ));
        assert!(base_url("not a url").is_err());
    }

    #[test]
    fn test_negotiate_url() {
        let url = negotiate_url(&base(), "chathub").unwrap();
        assert_eq!(url.path(), "/signalr/negotiate");
        assert_eq!(query(&url, "clientProtocol").as_deref(), Some("1.5"));
        assert_eq!(
            query(&url, "connectionData").as_deref(),
            Some(r#"[{"name":"chathub"}]"#)
        );
        assert_eq!(query(&url, "connectionToken"), None);
    }

    #[test]
    fn test_connect_and_start_urls_carry_token() {
        let connect = connect_url(&base(), "chathub", "abc+/=").unwrap();
        assert_eq!(connect.scheme(), "wss");
        assert_eq!(connect.path(), "/signalr/connect");
        assert_eq!(query(&connect, "transport").as_deref(), Some("webSockets"));
        assert_eq!(query(&connect, "connectionToken").as_deref(), Some("abc+/="));

        let start = start_url(&base(), "chathub", "abc").unwrap();
        assert_eq!(start.scheme(), "https");
        assert_eq!(start.path(), "/signalr/start");

        let local = base_url("http://localhost/").unwrap();
        assert_eq!(connect_url(&local, "chathub", "t").unwrap().scheme(), "ws");
    }

    #[test]
    fn test_negotiate_response() {
        let response = parse_negotiate_response(
            r#"{"Url":"/signalr","ConnectionToken":"tok","ConnectionId":"id","KeepAliveTimeout":20.0,
                "DisconnectTimeout":30.0,"TryWebSockets":true,"ProtocolVersion":"1.5"}"#,
        )
        .unwrap();
        assert_eq!(response.connection_token, "tok");
        assert_eq!(response.keep_alive_timeout(), Some(Duration::from_secs(20)));
        assert!(response.allows_websockets());

        let no_keep_alive =
            parse_negotiate_response(r#"{"ConnectionToken":"tok","KeepAliveTimeout":null}"#).unwrap();
        assert_eq!(no_keep_alive.keep_alive_timeout(), None);

        assert!(matches!(
            parse_negotiate_response("<html>"),
            Err(HubError::Handshake { .. })
        ));
    }

    #[test]
    fn test_start_response() {
        assert!(parse_start_response(r#"{"Response":"started"}"#).is_ok());
        assert!(parse_start_response(r#"{"Response":"nope"}"#).is_err());
        assert!(parse_start_response("").is_err());
    }

    #[test]
    fn test_decode_keep_alive_and_init() {
        assert_eq!(decode_frame("{}").unwrap(), HubFrame::KeepAlive);

        let init = decode_frame(r#"{"C":"d-1,0","S":1,"M":[]}"#).unwrap();
        assert_eq!(
            init,
            HubFrame::Messages {
                initialized: true,
                reconnect: false,
                disconnect: false,
                invocations: Vec::new(),
            }
        );
        assert!(!init.ends_link());
    }

    #[test]
    fn test_decode_server_invocations() {
        let frame = decode_frame(
            r#"{"C":"d-1,1","M":[{"H":"ChatHub","M":"SendMessage","A":["global",{"Text":"hi"}]}]}"#,
        )
        .unwrap();
        match frame {
            HubFrame::Messages { invocations, .. } => {
                assert_eq!(invocations.len(), 1);
                assert_eq!(invocations[0].hub, "ChatHub");
                assert_eq!(invocations[0].method, "SendMessage");
                assert_eq!(invocations[0].arguments[0], "global");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_results_and_control_flags() {
        assert_eq!(
            decode_frame(r#"{"I":"4","E":"boom"}"#).unwrap(),
            HubFrame::Result {
                invocation_id: "4".to_string(),
                error: Some("boom".to_string()),
            }
        );
        assert_eq!(
            decode_frame(r#"{"I":5,"R":null}"#).unwrap(),
            HubFrame::Result {
                invocation_id: "5".to_string(),
                error: None,
            }
        );
        assert!(decode_frame(r#"{"C":"d-1,2","T":1,"M":[]}"#).unwrap().ends_link());
        assert!(decode_frame(r#"{"D":1}"#).unwrap().ends_link());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_frame("[]"), Err(HubError::Protocol { .. })));
        assert!(matches!(decode_frame("{"), Err(HubError::Json(_))));
    }

    #[test]
    fn test_encode_invocation() {
        let encoded = encode_invocation(
            "chathub",
            "PushExternalMessage",
            &[json!("Global"), json!({"text": "hi"})],
            "7",
        );
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["H"], "chathub");
        assert_eq!(value["M"], "PushExternalMessage");
        assert_eq!(value["A"][0], "Global");
        assert_eq!(value["I"], "7");
    }
}
