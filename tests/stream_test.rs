use chrono::Utc;
use futures_util::StreamExt;
use memepulse::realtime::ChangeEvent;
use memepulse::server::{trend_stream, AppState};
use memepulse::supabase::SupabaseClient;
use memepulse::types::TimeRange;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn test_state() -> (Arc<AppState>, broadcast::Sender<ChangeEvent>) {
    let supabase = SupabaseClient::new("http://127.0.0.1:9", "test-key");
    let (tx, _) = broadcast::channel::<ChangeEvent>(16);
    (Arc::new(AppState::new(supabase, tx.clone())), tx)
}

fn change() -> ChangeEvent {
    ChangeEvent {
        table: "tiktoks".to_string(),
        at: Utc::now(),
    }
}

#[tokio::test]
async fn stream_sends_an_immediate_snapshot_and_recomputes_on_changes() {
    let (state, tx) = test_state();
    let mut stream = trend_stream(Arc::clone(&state), TimeRange::Day);

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("snapshot frame");
    assert!(first.is_some());
    assert_eq!(state.open_streams.load(Ordering::Relaxed), 1);

    tx.send(change()).unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("frame after change notification");
    assert!(second.is_some());
}

#[tokio::test]
async fn disconnect_stops_the_forwarder() {
    let (state, tx) = test_state();
    let mut stream = trend_stream(Arc::clone(&state), TimeRange::Day);

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("snapshot frame");
    assert!(first.is_some());

    // dropping the stream is the client disconnect; the forwarder notices
    // on its next send and releases its timers and subscription
    drop(stream);
    tx.send(change()).ok();

    let mut released = false;
    for _ in 0..50 {
        if state.open_streams.load(Ordering::Relaxed) == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(released, "forwarder kept running after disconnect");
}
