use crate::realtime::ChangeEvent;
use crate::supabase::SupabaseClient;
use crate::trends::{TrendAggregator, ROW_CAP};
use crate::types::{TimeRange, TrendSnapshot};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct AppState {
    pub supabase: SupabaseClient,
    pub trends: TrendAggregator,
    pub changes: broadcast::Sender<ChangeEvent>,
    pub snapshots_sent: AtomicU64,
    pub open_streams: AtomicUsize,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(supabase: SupabaseClient, changes: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            supabase,
            trends: TrendAggregator::new(),
            changes,
            snapshots_sent: AtomicU64::new(0),
            open_streams: AtomicUsize::new(0),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/trends", get(trends))
        .route("/api/channels", get(channels).patch(patch_channel))
        .route("/api/tokens", axum::routing::patch(patch_token))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "memepulse",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "snapshotsSent": state.snapshots_sent.load(Ordering::Relaxed),
        "openStreams": state.open_streams.load(Ordering::Relaxed),
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

#[derive(Deserialize)]
struct TrendsQuery {
    #[serde(rename = "timeRange")]
    time_range: Option<String>,
    realtime: Option<String>,
}

async fn trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendsQuery>,
) -> Response {
    let range = match query.time_range.as_deref() {
        None => TimeRange::Day,
        Some(s) => match TimeRange::parse(s) {
            Some(range) => range,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "timeRange must be one of 1h, 24h, 7d, 30d, all",
                )
            }
        },
    };

    if query.realtime.as_deref() == Some("true") {
        return Sse::new(trend_stream(state, range)).into_response();
    }

    Json(compute_current(&state, range).await).into_response()
}

/// Tier-1 degradation: a failed fetch logs and aggregates over empty rows,
/// so the dashboard sees zero states rather than errors.
async fn compute_current(state: &AppState, range: TimeRange) -> TrendSnapshot {
    let messages = match state.supabase.recent_telegram_messages(range, ROW_CAP).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[Server] Message fetch failed: {}", e);
            Vec::new()
        }
    };
    let videos = match state.supabase.recent_tiktoks(range, ROW_CAP).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[Server] TikTok fetch failed: {}", e);
            Vec::new()
        }
    };
    state.snapshots_sent.fetch_add(1, Ordering::Relaxed);
    state.trends.compute_snapshot(range, &messages, &videos)
}

fn snapshot_event(snapshot: &TrendSnapshot) -> Event {
    Event::default().data(serde_json::to_string(snapshot).unwrap_or_default())
}

fn keepalive_event() -> Event {
    Event::default().data(
        serde_json::json!({
            "type": "keepalive",
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string(),
    )
}

/// Long-lived stream for one client: immediate snapshot, a recompute per
/// change notification, a keepalive frame every 30 s. The forwarder task
/// notices the dropped receiver on its next send and stops, releasing its
/// interval and subscription.
pub fn trend_stream(
    state: Arc<AppState>,
    range: TimeRange,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);

    tokio::spawn(async move {
        state.open_streams.fetch_add(1, Ordering::Relaxed);
        let mut changes = state.changes.subscribe();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;

        let snapshot = compute_current(&state, range).await;
        if tx.send(Ok(snapshot_event(&snapshot))).await.is_err() {
            state.open_streams.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        loop {
            let event = tokio::select! {
                _ = keepalive.tick() => keepalive_event(),
                change = changes.recv() => match change {
                    Ok(change) => {
                        debug!("[Server] Change on {} - recomputing", change.table);
                        let snapshot = compute_current(&state, range).await;
                        snapshot_event(&snapshot)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("[Server] Stream lagged {} change(s)", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if tx.send(Ok(event)).await.is_err() {
                break;
            }
        }

        state.open_streams.fetch_sub(1, Ordering::Relaxed);
        debug!("[Server] Stream closed");
    });

    ReceiverStream::new(rx)
}

#[derive(Deserialize)]
struct ChannelsQuery {
    enabled: Option<String>,
}

async fn channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    let enabled = match query.enabled.as_deref() {
        None => None,
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => {
            return error_response(StatusCode::BAD_REQUEST, "enabled must be true or false")
        }
    };
    match state.supabase.channels(enabled).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!("[Server] Channel list fetch failed: {}", e);
            Json(Vec::<crate::types::TelegramChannelRow>::new()).into_response()
        }
    }
}

#[derive(Deserialize)]
struct TokenPatch {
    id: Option<i64>,
    name: Option<String>,
    symbol: Option<String>,
    mint: Option<String>,
}

async fn patch_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenPatch>,
) -> Response {
    let Some(id) = body.id else {
        return error_response(StatusCode::BAD_REQUEST, "id is required");
    };

    let mut fields = serde_json::Map::new();
    if let Some(name) = body.name {
        fields.insert("name".to_string(), name.into());
    }
    if let Some(symbol) = body.symbol {
        fields.insert("symbol".to_string(), symbol.into());
    }
    if let Some(mint) = body.mint {
        fields.insert("mint".to_string(), mint.into());
    }
    if fields.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no fields to update");
    }

    update_and_respond(&state, "tokens", id, fields).await
}

#[derive(Deserialize)]
struct ChannelPatch {
    id: Option<i64>,
    title: Option<String>,
    enabled: Option<bool>,
}

async fn patch_channel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChannelPatch>,
) -> Response {
    let Some(id) = body.id else {
        return error_response(StatusCode::BAD_REQUEST, "id is required");
    };

    let mut fields = serde_json::Map::new();
    if let Some(title) = body.title {
        fields.insert("title".to_string(), title.into());
    }
    if let Some(enabled) = body.enabled {
        fields.insert("enabled".to_string(), enabled.into());
    }
    if fields.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no fields to update");
    }

    update_and_respond(&state, "telegram_channels", id, fields).await
}

async fn update_and_respond(
    state: &AppState,
    table: &str,
    id: i64,
    fields: serde_json::Map<String, serde_json::Value>,
) -> Response {
    match state
        .supabase
        .update_row(table, id, &serde_json::Value::Object(fields))
        .await
    {
        Ok(row) => Json(row).into_response(),
        Err(e) => {
            warn!("[Server] Update of {} {} failed: {}", table, id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "database update failed")
        }
    }
}
