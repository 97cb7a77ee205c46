use crate::error::{check_status, ApiError};
use crate::types::{
    MentionRow, PatternDetectionRow, PatternInsightRow, PriceRow, TelegramChannelRow,
    TelegramMessageRow, TikTokRow, TimeRange, TokenRow,
};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Thin client over the Supabase PostgREST interface. All reads parse into
/// typed rows; callers decide whether a failure degrades or propagates.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn rest(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.url, table))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
    }

    fn iso(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>, ApiError> {
        let response = self.rest(Method::GET, table).query(query).send().await?;
        let response = check_status(response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| ApiError::Decode(format!("{}: {}", table, e)))
    }

    /// Query fragment for "newest rows inside the window, capped".
    fn window_query(column: &str, range: TimeRange, cap: usize) -> Vec<(String, String)> {
        let mut query = vec![
            ("order".to_string(), format!("{}.desc", column)),
            ("limit".to_string(), cap.to_string()),
        ];
        if let Some(window) = range.window() {
            let cutoff = Utc::now() - window;
            query.push((column.to_string(), format!("gte.{}", Self::iso(cutoff))));
        }
        query
    }

    // ---- tokens ----------------------------------------------------------

    /// Insert-or-update keyed on the token `uri`; a second upsert with the
    /// same uri overwrites name/symbol in place.
    pub async fn upsert_token(&self, token: &TokenRow) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "tokens")
            .query(&[("on_conflict", "uri")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(token)
            .send()
            .await?;
        check_status(response).await?;
        debug!("[Supabase] Upserted token {} ({})", token.symbol, token.uri);
        Ok(())
    }

    // ---- prices ----------------------------------------------------------

    /// Two independent writes, not a transaction: clear `is_latest` on the
    /// token's rows, then insert the new latest row. A failure between the
    /// two leaves drift that `reconcile_latest_flags` repairs.
    pub async fn insert_price(
        &self,
        token_uri: &str,
        price_usd: f64,
        trade_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let clear = self
            .rest(Method::PATCH, "prices")
            .query(&[
                ("token_uri".to_string(), format!("eq.{}", token_uri)),
                ("is_latest".to_string(), "eq.true".to_string()),
            ])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_latest": false }))
            .send()
            .await?;
        check_status(clear).await?;

        let row = PriceRow {
            id: None,
            token_uri: token_uri.to_string(),
            price_usd,
            trade_at,
            is_latest: true,
        };
        let insert = self
            .rest(Method::POST, "prices")
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        check_status(insert).await?;

        info!(
            "[Supabase] Inserted price for {}: ${} @ {}",
            token_uri,
            price_usd,
            Self::iso(trade_at)
        );
        Ok(())
    }

    /// Latest price resolved by `trade_at` ordering, which is authoritative
    /// over the denormalized `is_latest` flag.
    pub async fn latest_price(&self, token_uri: &str) -> Result<Option<PriceRow>, ApiError> {
        let rows: Vec<PriceRow> = self
            .select(
                "prices",
                &[
                    ("token_uri".to_string(), format!("eq.{}", token_uri)),
                    ("order".to_string(), "trade_at.desc".to_string()),
                    ("limit".to_string(), "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn recent_prices(
        &self,
        token_uri: &str,
        range: TimeRange,
        cap: usize,
    ) -> Result<Vec<PriceRow>, ApiError> {
        let mut query = Self::window_query("trade_at", range, cap);
        query.push(("token_uri".to_string(), format!("eq.{}", token_uri)));
        self.select("prices", &query).await
    }

    /// Repair `is_latest` drift left by partial `insert_price` failures:
    /// clear the flag everywhere except the `trade_at`-newest row, then
    /// stamp that row if needed.
    pub async fn reconcile_latest_flags(&self, token_uri: &str) -> Result<(), ApiError> {
        let Some(latest) = self.latest_price(token_uri).await? else {
            return Ok(());
        };
        let Some(latest_id) = latest.id else {
            return Ok(());
        };

        let clear = self
            .rest(Method::PATCH, "prices")
            .query(&[
                ("token_uri".to_string(), format!("eq.{}", token_uri)),
                ("id".to_string(), format!("neq.{}", latest_id)),
                ("is_latest".to_string(), "eq.true".to_string()),
            ])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "is_latest": false }))
            .send()
            .await?;
        check_status(clear).await?;

        if !latest.is_latest {
            let stamp = self
                .rest(Method::PATCH, "prices")
                .query(&[("id".to_string(), format!("eq.{}", latest_id))])
                .header("Prefer", "return=minimal")
                .json(&serde_json::json!({ "is_latest": true }))
                .send()
                .await?;
            check_status(stamp).await?;
            info!("[Supabase] Reconciled is_latest for {}", token_uri);
        }
        Ok(())
    }

    // ---- telegram --------------------------------------------------------

    pub async fn upsert_channel(&self, channel: &TelegramChannelRow) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "telegram_channels")
            .query(&[("on_conflict", "channel_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(channel)
            .send()
            .await?;
        check_status(response).await?;
        info!("[Supabase] Upserted channel {} ({})", channel.title, channel.channel_id);
        Ok(())
    }

    pub async fn channels(&self, enabled: Option<bool>) -> Result<Vec<TelegramChannelRow>, ApiError> {
        let mut query = vec![("order".to_string(), "title.asc".to_string())];
        if let Some(enabled) = enabled {
            query.push(("enabled".to_string(), format!("eq.{}", enabled)));
        }
        self.select("telegram_channels", &query).await
    }

    /// Re-polling can hand us the same update twice; duplicates are dropped
    /// on the (channel_id, message_id) constraint.
    pub async fn insert_telegram_message(
        &self,
        message: &TelegramMessageRow,
    ) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "telegram_messages")
            .query(&[("on_conflict", "channel_id,message_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(message)
            .send()
            .await?;
        check_status(response).await?;
        debug!(
            "[Supabase] Stored message {} from channel {}",
            message.message_id, message.channel_id
        );
        Ok(())
    }

    pub async fn recent_telegram_messages(
        &self,
        range: TimeRange,
        cap: usize,
    ) -> Result<Vec<TelegramMessageRow>, ApiError> {
        self.select("telegram_messages", &Self::window_query("sent_at", range, cap))
            .await
    }

    // ---- tiktoks ---------------------------------------------------------

    pub async fn upsert_tiktok(&self, video: &TikTokRow) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "tiktoks")
            .query(&[("on_conflict", "video_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(video)
            .send()
            .await?;
        check_status(response).await?;
        debug!("[Supabase] Upserted tiktok {}", video.video_id);
        Ok(())
    }

    pub async fn recent_tiktoks(
        &self,
        range: TimeRange,
        cap: usize,
    ) -> Result<Vec<TikTokRow>, ApiError> {
        self.select("tiktoks", &Self::window_query("fetched_at", range, cap))
            .await
    }

    // ---- mentions --------------------------------------------------------

    pub async fn insert_mentions(&self, mentions: &[MentionRow]) -> Result<(), ApiError> {
        if mentions.is_empty() {
            return Ok(());
        }
        let response = self
            .rest(Method::POST, "mentions")
            .header("Prefer", "return=minimal")
            .json(mentions)
            .send()
            .await?;
        check_status(response).await?;
        debug!("[Supabase] Inserted {} mention(s)", mentions.len());
        Ok(())
    }

    pub async fn recent_mentions(
        &self,
        term: &str,
        range: TimeRange,
        cap: usize,
    ) -> Result<Vec<MentionRow>, ApiError> {
        let mut query = Self::window_query("mentioned_at", range, cap);
        query.push(("term".to_string(), format!("eq.{}", term)));
        self.select("mentions", &query).await
    }

    // ---- patterns --------------------------------------------------------

    pub async fn insert_pattern_detection(
        &self,
        detection: &PatternDetectionRow,
    ) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "pattern_detections")
            .header("Prefer", "return=minimal")
            .json(detection)
            .send()
            .await?;
        check_status(response).await?;
        info!(
            "[Supabase] Recorded {} for {} (strength {:.2})",
            detection.pattern_type, detection.token_uri, detection.strength
        );
        Ok(())
    }

    pub async fn upsert_pattern_insight(
        &self,
        insight: &PatternInsightRow,
    ) -> Result<(), ApiError> {
        let response = self
            .rest(Method::POST, "pattern_insights")
            .query(&[("on_conflict", "token_uri")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(insight)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    // ---- generic PATCH ---------------------------------------------------

    /// Update a row by id and return the updated representation. Used by
    /// the PATCH API routes.
    pub async fn update_row(
        &self,
        table: &str,
        id: i64,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let response = self
            .rest(Method::PATCH, table)
            .query(&[("id".to_string(), format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        let response = check_status(response).await?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{}: {}", table, e)))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::Decode(format!("no row with id {} in {}", id, table)))
    }
}
