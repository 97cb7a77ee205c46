use memepulse::{
    config::Config,
    realtime::{poll_ticker, ChangeEvent, RealtimeSubscriber},
    server::{router, AppState},
    supabase::SupabaseClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Fixed re-poll tick backing the SSE streams when the realtime feed is
/// quiet or gone.
const POLL_FALLBACK_PERIOD: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("memepulse=info")
        .init();

    info!("==================================================");
    info!("  MEMEPULSE - API server");
    info!("==================================================");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("Supabase URL: {}", config.supabase_url);

    let supabase = SupabaseClient::new(&config.supabase_url, &config.supabase_key);
    let (change_tx, _) = broadcast::channel::<ChangeEvent>(256);

    let subscriber =
        RealtimeSubscriber::new(&config.supabase_url, &config.supabase_key, change_tx.clone());
    tokio::spawn(subscriber.run());
    tokio::spawn(poll_ticker(POLL_FALLBACK_PERIOD, change_tx.clone()));

    let state = Arc::new(AppState::new(supabase, change_tx));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(
        "Server running on port {} (SSE at /api/trends?realtime=true)",
        config.port
    );
    axum::serve(listener, app).await?;
    Ok(())
}
