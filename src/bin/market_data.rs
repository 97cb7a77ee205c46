use memepulse::{
    bitquery::{BitqueryClient, MarketDataWorker},
    config::Config,
    supabase::SupabaseClient,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("memepulse=info")
        .init();

    info!("MARKET-DATA - Bitquery trade poller");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let api_key = match config.bitquery_api_key() {
        Ok(key) => key.to_string(),
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let supabase = SupabaseClient::new(&config.supabase_url, &config.supabase_key);
    MarketDataWorker::new(BitqueryClient::new(&api_key), supabase)
        .run()
        .await;
}
