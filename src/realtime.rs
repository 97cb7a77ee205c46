use crate::error::ApiError;
use crate::reconnect::{run_with_reconnect, BackoffPolicy};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Tables whose changes invalidate trend snapshots.
pub const WATCHED_TABLES: &[&str] = &["telegram_messages", "tiktoks", "mentions"];

/// A database change observed on the realtime feed. Consumers only need to
/// know *that* something changed; they recompute the snapshot from scratch.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub at: DateTime<Utc>,
}

/// Phoenix-protocol frame envelope; payload contents are irrelevant here.
#[derive(Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
}

/// Subscribes to the Supabase realtime websocket and fans change events
/// into the broadcast bus. Runs under the shared reconnect policy and
/// returns once it is exhausted; the server's poll tick covers the gap.
pub struct RealtimeSubscriber {
    ws_url: String,
    tx: broadcast::Sender<ChangeEvent>,
}

impl RealtimeSubscriber {
    pub fn new(supabase_url: &str, service_key: &str, tx: broadcast::Sender<ChangeEvent>) -> Self {
        let ws_url = format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            supabase_url.trim_end_matches('/').replacen("http", "ws", 1),
            service_key
        );
        Self { ws_url, tx }
    }

    pub async fn run(self) {
        let Self { ws_url, tx } = self;
        run_with_reconnect("Realtime", BackoffPolicy::default(), move || {
            let ws_url = ws_url.clone();
            let tx = tx.clone();
            async move { session(&ws_url, tx).await }
        })
        .await;
    }
}

async fn session(ws_url: &str, tx: broadcast::Sender<ChangeEvent>) -> Result<(), ApiError> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    info!("[Realtime] Connected, joining {} channel(s)", WATCHED_TABLES.len());
    let (mut write, mut read) = ws_stream.split();

    for (i, table) in WATCHED_TABLES.iter().enumerate() {
        let join = serde_json::json!({
            "topic": format!("realtime:public:{}", table),
            "event": "phx_join",
            "payload": {},
            "ref": (i + 1).to_string(),
        });
        write.send(Message::Text(join.to_string())).await?;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut heartbeat_ref: u64 = 100;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let beat = serde_json::json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": heartbeat_ref.to_string(),
                });
                write.send(Message::Text(beat.to_string())).await?;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&text, &tx),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

fn handle_frame(text: &str, tx: &broadcast::Sender<ChangeEvent>) {
    let Ok(message) = serde_json::from_str::<PhoenixMessage>(text) else {
        debug!("[Realtime] Unparsed frame: {}", text);
        return;
    };
    match message.event.as_str() {
        "INSERT" | "UPDATE" | "DELETE" => {
            let table = message
                .topic
                .rsplit(':')
                .next()
                .unwrap_or_default()
                .to_string();
            debug!("[Realtime] {} on {}", message.event, table);
            let _ = tx.send(ChangeEvent {
                table,
                at: Utc::now(),
            });
        }
        "phx_reply" => debug!("[Realtime] Ack for {}", message.topic),
        _ => {}
    }
}

/// Fallback change source: a fixed tick that invalidates snapshots
/// unconditionally when no realtime feed is connected.
pub async fn poll_ticker(period: Duration, tx: broadcast::Sender<ChangeEvent>) {
    let mut tick = tokio::time::interval(period);
    tick.tick().await;
    loop {
        tick.tick().await;
        let _ = tx.send(ChangeEvent {
            table: "poll".to_string(),
            at: Utc::now(),
        });
    }
}
