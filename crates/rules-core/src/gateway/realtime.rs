//! Realtime change channel
//!
//! Maintains a long-lived websocket to the backend's realtime endpoint and
//! turns `postgres_changes` events into [`ChangeNotice`]s. Messages use the
//! Phoenix channel envelope (`topic`, `event`, `payload`, `ref`) as JSON
//! text frames. Reconnects automatically with exponential backoff.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChangeNotice, Resource};

/// Channel topic joined for rule and vote changes
const CHANNEL_TOPIC: &str = "realtime:rules-changes";

/// Configuration for the realtime listener
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket URL including the api key
    pub url: String,
    pub api_key: String,
    pub heartbeat_interval: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl RealtimeConfig {
    /// Derive the websocket endpoint from the backend base URL
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            url: websocket_url(base_url, api_key),
            api_key: api_key.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// `https://host` -> `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn websocket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", base, api_key)
}

/// Phoenix channel envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    /// Join the change channel for `tables`
    pub fn join(tables: &[Resource], api_key: &str, reference: u64) -> Self {
        let changes: Vec<Value> = tables
            .iter()
            .map(|t| json!({"event": "*", "schema": "public", "table": t.table()}))
            .collect();

        Self {
            topic: CHANNEL_TOPIC.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": {"self": false},
                    "presence": {"key": ""},
                    "postgres_changes": changes,
                },
                "access_token": api_key,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of strings and JSON values cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The table a `postgres_changes` event refers to
    pub fn changed_resource(&self) -> Option<Resource> {
        if self.event != "postgres_changes" {
            return None;
        }
        self.payload
            .get("data")
            .and_then(|data| data.get("table"))
            .and_then(Value::as_str)
            .and_then(Resource::from_table)
    }

    /// Error text of a failed join reply
    pub fn join_error(&self) -> Option<String> {
        if self.event != "phx_reply" || self.topic != CHANNEL_TOPIC {
            return None;
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some("ok") | None => None,
            Some(_) => Some(
                self.payload
                    .get("response")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "join rejected".to_string()),
            ),
        }
    }
}

/// Spawn the listener task
///
/// Runs until `tx`'s receiver is dropped.
pub fn spawn_listener(
    config: RealtimeConfig,
    tables: Vec<Resource>,
    tx: mpsc::UnboundedSender<ChangeNotice>,
) -> JoinHandle<()> {
    tokio::spawn(listener_loop(config, tables, tx))
}

/// Main listener loop with reconnection
async fn listener_loop(
    config: RealtimeConfig,
    tables: Vec<Resource>,
    tx: mpsc::UnboundedSender<ChangeNotice>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        match connect_and_listen(&config, &tables, &tx).await {
            Ok(true) => break,
            Ok(false) => {
                // Connection closed normally, reset backoff
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(e) => {
                warn!("Realtime connection error: {}", e);
            }
        }

        // Wait before reconnecting, but stop if nobody is listening
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
            _ = tx.closed() => break,
        }
    }

    debug!("Realtime listener stopped");
}

/// Connect and forward change events until disconnection.
///
/// Returns `Ok(true)` when the subscriber went away.
async fn connect_and_listen(
    config: &RealtimeConfig,
    tables: &[Resource],
    tx: &mpsc::UnboundedSender<ChangeNotice>,
) -> Result<bool> {
    let (ws_stream, _) = connect_async(config.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut next_ref: u64 = 1;
    let join = ChannelMessage::join(tables, &config.api_key, next_ref);
    write.send(Message::Text(join.encode())).await?;
    info!("Realtime channel joined for {:?}", tables);

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                next_ref += 1;
                write
                    .send(Message::Text(ChannelMessage::heartbeat(next_ref).encode()))
                    .await?;
            }

            _ = tx.closed() => {
                write.close().await.ok();
                return Ok(true);
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(message) = ChannelMessage::decode(&text) else {
                            debug!("Ignoring undecodable realtime frame");
                            continue;
                        };
                        if let Some(error) = message.join_error() {
                            anyhow::bail!("Realtime join rejected: {}", error);
                        }
                        if let Some(resource) = message.changed_resource() {
                            debug!("Realtime change on {}", resource);
                            if tx.send(ChangeNotice { resource }).is_err() {
                                write.close().await.ok();
                                return Ok(true);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(false);
                    }
                    Some(Err(e)) => {
                        return Err(e.into());
                    }
                    _ => {}
                }
            }
        }
    }
}
