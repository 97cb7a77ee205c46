use crate::error::{check_status, ApiError};
use crate::patterns::{PatternDetector, PatternTracker};
use crate::supabase::SupabaseClient;
use crate::types::{TimeRange, TokenRow};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

const BITQUERY_URL: &str = "https://streaming.bitquery.io/eap";
const POLL_INTERVAL: Duration = Duration::from_secs(60);
const TRADE_LIMIT: usize = 50;
const PRICE_SERIES_CAP: usize = 50;

const TRADES_QUERY: &str = r#"
query RecentMemecoinTrades($limit: Int!) {
  Solana {
    DEXTradeByTokens(
      limit: {count: $limit}
      orderBy: {descending: Block_Time}
      where: {Trade: {Dex: {ProtocolName: {is: "pump"}}}}
    ) {
      Block { Time }
      Trade {
        Currency { Name Symbol MintAddress Uri }
        PriceInUSD
      }
    }
  }
}
"#;

/// One trade row flattened out of the GraphQL shape.
#[derive(Debug, Clone)]
pub struct TokenTrade {
    pub uri: String,
    pub name: String,
    pub symbol: String,
    pub mint: String,
    pub price_usd: f64,
    pub trade_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct ResponseData {
    #[serde(rename = "Solana")]
    solana: SolanaData,
}

#[derive(Deserialize)]
struct SolanaData {
    #[serde(rename = "DEXTradeByTokens", default)]
    trades: Vec<TradeEntry>,
}

#[derive(Deserialize)]
struct TradeEntry {
    #[serde(rename = "Block")]
    block: BlockInfo,
    #[serde(rename = "Trade")]
    trade: TradeInfo,
}

#[derive(Deserialize)]
struct BlockInfo {
    #[serde(rename = "Time")]
    time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TradeInfo {
    #[serde(rename = "Currency")]
    currency: CurrencyInfo,
    #[serde(rename = "PriceInUSD")]
    price_in_usd: Option<f64>,
}

#[derive(Deserialize)]
struct CurrencyInfo {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "MintAddress")]
    mint_address: String,
    #[serde(rename = "Uri")]
    uri: Option<String>,
}

pub struct BitqueryClient {
    client: Client,
    api_key: String,
}

impl BitqueryClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
        }
    }

    /// Newest pump.fun trades, flattened and filtered down to entries with
    /// a usable USD price.
    pub async fn fetch_recent_trades(&self, limit: usize) -> Result<Vec<TokenTrade>, ApiError> {
        let body = serde_json::json!({
            "query": TRADES_QUERY,
            "variables": { "limit": limit },
        });
        let response = self
            .client
            .post(BITQUERY_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("bitquery: {}", e)))?;

        if let Some(first) = parsed.errors.first() {
            return Err(ApiError::Decode(format!("graphql: {}", first.message)));
        }
        let data = parsed
            .data
            .ok_or_else(|| ApiError::Decode("graphql response without data".to_string()))?;

        Ok(data
            .solana
            .trades
            .into_iter()
            .filter_map(|entry| {
                let price_usd = entry.trade.price_in_usd.filter(|p| *p > 0.0)?;
                let currency = entry.trade.currency;
                let uri = currency
                    .uri
                    .unwrap_or_else(|| format!("solana:{}", currency.mint_address));
                Some(TokenTrade {
                    uri,
                    name: currency.name.unwrap_or_else(|| "Unknown".to_string()),
                    symbol: currency.symbol.unwrap_or_default(),
                    mint: currency.mint_address,
                    price_usd,
                    trade_at: entry.block.time,
                })
            })
            .collect())
    }
}

/// Poll loop: trades in, token/price rows out, plus a pattern pass over the
/// refreshed series.
pub struct MarketDataWorker {
    bitquery: BitqueryClient,
    supabase: SupabaseClient,
    detector: PatternDetector,
    tracker: PatternTracker,
}

impl MarketDataWorker {
    pub fn new(bitquery: BitqueryClient, supabase: SupabaseClient) -> Self {
        let tracker = PatternTracker::new(supabase.clone());
        Self {
            bitquery,
            supabase,
            detector: PatternDetector::default(),
            tracker,
        }
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tick.tick().await;

            // Upstream failure degrades to an empty cycle, never a crash.
            let trades = match self.bitquery.fetch_recent_trades(TRADE_LIMIT).await {
                Ok(trades) => trades,
                Err(e) => {
                    warn!("[MarketData] Fetch failed: {}", e);
                    Vec::new()
                }
            };
            if trades.is_empty() {
                continue;
            }
            info!("[MarketData] {} trade(s) fetched", trades.len());

            // One video fetch serves the whole cycle's view-spike checks.
            let videos = match self
                .supabase
                .recent_tiktoks(TimeRange::Day, crate::trends::ROW_CAP)
                .await
            {
                Ok(videos) => videos,
                Err(e) => {
                    warn!("[MarketData] TikTok fetch failed: {}", e);
                    Vec::new()
                }
            };

            let mut seen: HashSet<String> = HashSet::new();
            for trade in &trades {
                if !seen.insert(trade.uri.clone()) {
                    continue;
                }
                self.store_trade(trade).await;
                self.pattern_pass(trade, &videos).await;
            }
        }
    }

    async fn store_trade(&self, trade: &TokenTrade) {
        let token = TokenRow {
            id: None,
            uri: trade.uri.clone(),
            name: trade.name.clone(),
            symbol: trade.symbol.clone(),
            mint: Some(trade.mint.clone()),
        };
        if let Err(e) = self.supabase.upsert_token(&token).await {
            warn!("[MarketData] Token upsert failed for {}: {}", trade.uri, e);
            return;
        }

        if let Err(e) = self
            .supabase
            .insert_price(&trade.uri, trade.price_usd, trade.trade_at)
            .await
        {
            warn!("[MarketData] Price insert failed for {}: {}", trade.uri, e);
            // The two-step write may have left a stale is_latest flag.
            if let Err(e) = self.supabase.reconcile_latest_flags(&trade.uri).await {
                warn!("[MarketData] Reconcile failed for {}: {}", trade.uri, e);
            }
        }
    }

    async fn pattern_pass(&self, trade: &TokenTrade, videos: &[crate::types::TikTokRow]) {
        let now = Utc::now();
        let mut detections = Vec::new();

        match self
            .supabase
            .recent_prices(&trade.uri, TimeRange::Day, PRICE_SERIES_CAP)
            .await
        {
            Ok(rows) => {
                let series: Vec<f64> = rows.iter().map(|r| r.price_usd).collect();
                detections.extend(self.detector.detect_price_breakout(&trade.uri, now, &series));
            }
            Err(e) => warn!("[MarketData] Price series fetch failed: {}", e),
        }

        if !trade.symbol.is_empty() {
            let term = trade.symbol.to_ascii_lowercase();
            match self
                .supabase
                .recent_mentions(&term, TimeRange::Day, crate::trends::ROW_CAP)
                .await
            {
                Ok(rows) => {
                    let times: Vec<DateTime<Utc>> =
                        rows.iter().map(|m| m.mentioned_at).collect();
                    detections.extend(
                        self.detector
                            .detect_mention_surge(&trade.uri, now, &times),
                    );
                }
                Err(e) => warn!("[MarketData] Mention fetch failed: {}", e),
            }

            let view_points: Vec<(DateTime<Utc>, i64)> = videos
                .iter()
                .filter(|v| v.hashtags.iter().any(|t| t == &term))
                .map(|v| (v.fetched_at, v.view_count))
                .collect();
            detections.extend(
                self.detector
                    .detect_view_spike(&trade.uri, now, &view_points),
            );
        }

        if !detections.is_empty() {
            let stored = self.tracker.record(detections).await;
            if stored > 0 {
                info!("[MarketData] {} pattern(s) recorded for {}", stored, trade.uri);
            }
        }
    }
}
