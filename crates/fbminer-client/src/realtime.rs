//! Socket.IO push channel for customer activity.
//!
//! Speaks just enough Engine.IO v4 over a raw WebSocket: answer the open
//! packet with a namespace connect, reply to pings, subscribe to the current
//! page and decode `42[event, data]` frames into [`RealtimeEvent`]s.

use std::time::Duration;

use fbminer_core::config::WatchConfig;
use fbminer_core::error::{MinerError, Result};
use fbminer_core::types::Conversation;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Customer payload pushed by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushedCustomer {
    #[serde(alias = "customer_psid")]
    pub psid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "first_interaction_at")]
    pub first_interaction: Option<String>,
    #[serde(default, alias = "last_interaction_at")]
    pub last_interaction: Option<String>,
    #[serde(default)]
    pub mining_status: Option<String>,
}

impl From<PushedCustomer> for Conversation {
    fn from(c: PushedCustomer) -> Self {
        Self {
            conversation_id: c.psid.clone(),
            name: c.name.unwrap_or_default(),
            raw_psid: Some(c.psid),
            updated_time: c.last_interaction.clone(),
            created_time: c.first_interaction.clone(),
            last_user_message_time: c.last_interaction,
            first_interaction_at: c.first_interaction,
            source_type: None,
            platform: None,
            customer_type: None,
            mining_status: c.mining_status,
        }
    }
}

/// Events surfaced to the watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    Subscribed { page_id: String },
    NewCustomer { page_id: String, customer: PushedCustomer },
    CustomerUpdated { page_id: String, customer: PushedCustomer },
    Disconnected,
}

/// One decoded Engine.IO / Socket.IO text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{...}` handshake.
    Open(Value),
    /// `1`
    Close,
    /// `2`
    Ping,
    /// `3`
    Pong,
    /// `40` namespace connected.
    Connect,
    /// `41`
    Disconnect,
    /// `42["name", data]`
    Event { name: String, data: Value },
    Other(String),
}

pub fn parse_packet(text: &str) -> Packet {
    match text.as_bytes().first() {
        Some(b'0') => Packet::Open(serde_json::from_str(&text[1..]).unwrap_or(Value::Null)),
        Some(b'1') => Packet::Close,
        Some(b'2') => Packet::Ping,
        Some(b'3') => Packet::Pong,
        Some(b'4') => parse_socket_packet(&text[1..]),
        _ => Packet::Other(text.to_string()),
    }
}

fn parse_socket_packet(body: &str) -> Packet {
    match body.as_bytes().first() {
        Some(b'0') => Packet::Connect,
        Some(b'1') => Packet::Disconnect,
        Some(b'2') => {
            let Ok(Value::Array(mut parts)) = serde_json::from_str::<Value>(&body[1..]) else {
                return Packet::Other(body.to_string());
            };
            if parts.is_empty() {
                return Packet::Other(body.to_string());
            }
            let name = parts.remove(0).as_str().unwrap_or_default().to_string();
            let data = parts.into_iter().next().unwrap_or(Value::Null);
            Packet::Event { name, data }
        }
        _ => Packet::Other(body.to_string()),
    }
}

/// Encode a client event frame.
pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", json!([name, data]))
}

/// WebSocket endpoint for a backend base URL.
pub fn socket_url(base_url: &str, socket_path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let path = if socket_path.starts_with('/') {
        socket_path.to_string()
    } else {
        format!("/{socket_path}")
    };
    format!("{base}{path}?EIO=4&transport=websocket")
}

/// Decode a server event; events for other pages are dropped.
pub fn decode_event(name: &str, data: Value, page_id: &str) -> Option<RealtimeEvent> {
    let event_page = data
        .get("page_id")
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
    match name {
        "connected" => Some(RealtimeEvent::Connected),
        "subscribed" => Some(RealtimeEvent::Subscribed {
            page_id: event_page.unwrap_or_else(|| page_id.to_string()),
        }),
        "new_customer" | "customer_updated" => {
            let event_page = event_page?;
            if event_page != page_id {
                tracing::trace!("ignoring {name} for page {event_page}");
                return None;
            }
            let customer: PushedCustomer = match serde_json::from_value(data["customer"].clone()) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Malformed {name} payload: {e}");
                    return None;
                }
            };
            Some(if name == "new_customer" {
                RealtimeEvent::NewCustomer { page_id: event_page, customer }
            } else {
                RealtimeEvent::CustomerUpdated { page_id: event_page, customer }
            })
        }
        other => {
            tracing::debug!("Unhandled realtime event '{other}'");
            None
        }
    }
}

enum Command {
    SwitchPage(String),
}

/// Socket.IO client with bounded fixed-delay reconnects.
pub struct RealtimeClient {
    url: String,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl RealtimeClient {
    pub fn new(base_url: &str, config: &WatchConfig) -> Self {
        Self {
            url: socket_url(base_url, &config.socket_path),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect in the background and subscribe to `page_id`.
    pub fn spawn(self, page_id: &str) -> (RealtimeHandle, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(page_id.to_string(), event_tx, cmd_rx));
        (RealtimeHandle { commands: cmd_tx, task }, event_rx)
    }

    async fn run(
        self,
        mut page_id: String,
        events: mpsc::Sender<RealtimeEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let mut failures = 0u32;
        loop {
            let mut connected = false;
            match self.session(&mut page_id, &events, &mut commands, &mut connected).await {
                Ok(true) => return,
                Ok(false) => tracing::info!("🔌 Realtime connection closed"),
                Err(e) => tracing::warn!("⚠️ Realtime connection failed: {e}"),
            }
            if events.send(RealtimeEvent::Disconnected).await.is_err() {
                return;
            }
            failures = if connected { 1 } else { failures + 1 };
            if failures > self.reconnect_attempts {
                tracing::error!("❌ Realtime gave up after {} attempts", self.reconnect_attempts);
                return;
            }
            tracing::info!(
                "🔄 Reconnecting in {:?} (attempt {failures}/{})",
                self.reconnect_delay,
                self.reconnect_attempts
            );
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// One connection lifetime. `Ok(true)` means the consumer went away.
    async fn session(
        &self,
        page_id: &mut String,
        events: &mpsc::Sender<RealtimeEvent>,
        commands: &mut mpsc::Receiver<Command>,
        connected: &mut bool,
    ) -> Result<bool> {
        tracing::info!("Connecting to realtime channel: {}", self.url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| MinerError::Realtime(format!("WebSocket connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            tracing::debug!("Realtime close frame: {frame:?}");
                            return Ok(false);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(MinerError::Realtime(format!("WebSocket error: {e}"))),
                        None => return Ok(false),
                    };
                    let reply = match parse_packet(&text) {
                        Packet::Open(_) => Some("40".to_string()),
                        Packet::Ping => Some("3".to_string()),
                        Packet::Connect => {
                            *connected = true;
                            tracing::info!("✅ Realtime connected, subscribing to page {page_id}");
                            Some(encode_event("subscribe_page", &json!({ "page_id": page_id })))
                        }
                        Packet::Event { name, data } => {
                            if let Some(event) = decode_event(&name, data, page_id) {
                                if events.send(event).await.is_err() {
                                    return Ok(true);
                                }
                            }
                            None
                        }
                        Packet::Close | Packet::Disconnect => return Ok(false),
                        Packet::Pong | Packet::Other(_) => None,
                    };
                    if let Some(reply) = reply {
                        write
                            .send(WsMessage::Text(reply))
                            .await
                            .map_err(|e| MinerError::Realtime(format!("WebSocket send failed: {e}")))?;
                    }
                }
                command = commands.recv() => {
                    let Some(Command::SwitchPage(next)) = command else {
                        return Ok(true);
                    };
                    if *connected {
                        for frame in [
                            encode_event("unsubscribe_page", &json!({ "page_id": page_id })),
                            encode_event("subscribe_page", &json!({ "page_id": next })),
                        ] {
                            write
                                .send(WsMessage::Text(frame))
                                .await
                                .map_err(|e| MinerError::Realtime(format!("WebSocket send failed: {e}")))?;
                        }
                    }
                    tracing::info!("Realtime page switched {page_id} → {next}");
                    *page_id = next;
                }
            }
        }
    }
}

/// Running realtime task; dropping it stops the connection.
pub struct RealtimeHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    /// Move the subscription to another page.
    pub async fn switch_page(&self, page_id: &str) -> Result<()> {
        self.commands
            .send(Command::SwitchPage(page_id.to_string()))
            .await
            .map_err(|_| MinerError::Realtime("realtime task has stopped".into()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
