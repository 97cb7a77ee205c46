use memepulse::{config::Config, supabase::SupabaseClient, tiktok::TikTokScraper};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("memepulse=info")
        .init();

    info!("TIKTOK-INGEST - video sweep");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let access_token = match config.tiktok_access_token() {
        Ok(token) => token.to_string(),
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let supabase = SupabaseClient::new(&config.supabase_url, &config.supabase_key);
    TikTokScraper::new(&access_token, supabase).run().await;
}
