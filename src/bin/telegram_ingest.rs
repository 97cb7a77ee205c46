use memepulse::{config::Config, supabase::SupabaseClient, telegram::TelegramWatcher};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("memepulse=info")
        .init();

    info!("TELEGRAM-INGEST - channel post watcher");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let bot_token = match config.telegram_bot_token() {
        Ok(token) => token.to_string(),
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let supabase = SupabaseClient::new(&config.supabase_url, &config.supabase_key);
    TelegramWatcher::new(&bot_token, supabase).run().await;
}
