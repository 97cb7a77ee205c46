use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Environment-driven configuration, loaded once at startup and passed
/// through constructors. Binaries take no flags; everything comes from the
/// process environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub supabase_url: String,
    pub supabase_key: String,
    bitquery_api_key: Option<String>,
    tiktok_access_token: Option<String>,
    telegram_bot_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let supabase_url =
            env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_key = env::var("SUPABASE_ANON_SECRET")
            .map_err(|_| ConfigError::Missing("SUPABASE_ANON_SECRET"))?;

        let port: u16 = env::var("PORT")
            .unwrap_or("3001".into())
            .parse()
            .unwrap_or(3001);

        Ok(Self {
            port,
            supabase_url,
            supabase_key,
            bitquery_api_key: env::var("BITQUERY_API_KEY").ok(),
            tiktok_access_token: env::var("ACCESS_TOKEN").ok(),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
        })
    }

    /// Required by the market-data worker only.
    pub fn bitquery_api_key(&self) -> Result<&str, ConfigError> {
        self.bitquery_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("BITQUERY_API_KEY"))
    }

    /// Required by the tiktok-ingest worker only.
    pub fn tiktok_access_token(&self) -> Result<&str, ConfigError> {
        self.tiktok_access_token
            .as_deref()
            .ok_or(ConfigError::Missing("ACCESS_TOKEN"))
    }

    /// Required by the telegram-ingest worker only.
    pub fn telegram_bot_token(&self) -> Result<&str, ConfigError> {
        self.telegram_bot_token
            .as_deref()
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
    }
}
