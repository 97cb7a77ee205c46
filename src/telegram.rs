use crate::error::{check_status, ApiError};
use crate::supabase::SupabaseClient;
use crate::types::{MentionRow, MentionSource, TelegramChannelRow, TelegramMessageRow};
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const LONG_POLL_SECS: u64 = 30;
const ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    channel_post: Option<ChannelPost>,
}

#[derive(Deserialize)]
struct ChannelPost {
    message_id: i64,
    date: i64,
    chat: Chat,
    text: Option<String>,
    views: Option<i64>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

/// Long-polls the Bot API for channel posts and writes messages, channels
/// and cashtag mentions through to Supabase.
pub struct TelegramWatcher {
    client: Client,
    base_url: String,
    supabase: SupabaseClient,
    offset: i64,
    known_channels: HashSet<i64>,
}

impl TelegramWatcher {
    pub fn new(bot_token: &str, supabase: SupabaseClient) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", bot_token),
            supabase,
            offset: 0,
            known_channels: HashSet::new(),
        }
    }

    async fn get_updates(&self) -> Result<Vec<Update>, ApiError> {
        let response = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .query(&[
                ("timeout", LONG_POLL_SECS.to_string()),
                ("offset", self.offset.to_string()),
                ("allowed_updates", r#"["channel_post"]"#.to_string()),
            ])
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: UpdatesResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("getUpdates: {}", e)))?;
        if !parsed.ok {
            return Err(ApiError::Decode(
                parsed
                    .description
                    .unwrap_or_else(|| "getUpdates returned ok=false".to_string()),
            ));
        }
        Ok(parsed.result)
    }

    pub async fn run(mut self) {
        info!("[Telegram] Watching for channel posts");
        loop {
            let updates = match self.get_updates().await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("[Telegram] getUpdates failed: {}", e);
                    tokio::time::sleep(ERROR_PAUSE).await;
                    continue;
                }
            };
            if updates.is_empty() {
                continue;
            }

            let disabled = self.disabled_channels().await;
            for update in updates {
                self.offset = self.offset.max(update.update_id + 1);
                let Some(post) = update.channel_post else {
                    continue;
                };
                self.ingest_post(post, &disabled).await;
            }
        }
    }

    /// Channels switched off from the dashboard. A fetch failure degrades
    /// to "nothing disabled" rather than dropping the cycle.
    async fn disabled_channels(&self) -> HashSet<i64> {
        match self.supabase.channels(Some(false)).await {
            Ok(rows) => rows.into_iter().map(|c| c.channel_id).collect(),
            Err(e) => {
                warn!("[Telegram] Channel list fetch failed: {}", e);
                HashSet::new()
            }
        }
    }

    async fn ingest_post(&mut self, post: ChannelPost, disabled: &HashSet<i64>) {
        if disabled.contains(&post.chat.id) {
            debug!("[Telegram] Skipping disabled channel {}", post.chat.id);
            return;
        }

        if !self.known_channels.contains(&post.chat.id) {
            let channel = TelegramChannelRow {
                id: None,
                channel_id: post.chat.id,
                title: post
                    .chat
                    .title
                    .clone()
                    .unwrap_or_else(|| "untitled".to_string()),
                username: post.chat.username.clone(),
                enabled: true,
            };
            match self.supabase.upsert_channel(&channel).await {
                Ok(()) => {
                    self.known_channels.insert(post.chat.id);
                }
                Err(e) => warn!("[Telegram] Channel upsert failed: {}", e),
            }
        }

        let Some(text) = post.text.filter(|t| !t.is_empty()) else {
            return;
        };
        let sent_at = Utc
            .timestamp_opt(post.date, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let message = TelegramMessageRow {
            id: None,
            message_id: post.message_id,
            channel_id: post.chat.id,
            text: text.clone(),
            view_count: post.views,
            sent_at,
        };
        if let Err(e) = self.supabase.insert_telegram_message(&message).await {
            warn!("[Telegram] Message insert failed: {}", e);
            return;
        }

        let mentions: Vec<MentionRow> = extract_cashtags(&text)
            .into_iter()
            .map(|term| MentionRow {
                id: None,
                source: MentionSource::Telegram,
                term,
                mentioned_at: sent_at,
            })
            .collect();
        if let Err(e) = self.supabase.insert_mentions(&mentions).await {
            warn!("[Telegram] Mention insert failed: {}", e);
        }
    }
}

/// `$SYMBOL`-style mentions: 2-10 alphanumeric chars after `$` containing
/// at least one letter, not preceded by a word character (so "US$50" does
/// not count). Lowercased, deduped preserving first-seen order.
pub fn extract_cashtags(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' || (i > 0 && chars[i - 1].is_alphanumeric()) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && chars[j].is_ascii_alphanumeric() {
            j += 1;
        }
        let tag: String = chars[i + 1..j].iter().collect();
        if (2..=10).contains(&tag.len()) && tag.chars().any(|c| c.is_ascii_alphabetic()) {
            let lower = tag.to_ascii_lowercase();
            if seen.insert(lower.clone()) {
                out.push(lower);
            }
        }
        i = j.max(i + 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cashtags_are_extracted_and_deduped() {
        let tags = extract_cashtags("buy $PEPE now! $pepe to the moon, also $WIF");
        assert_eq!(tags, vec!["pepe".to_string(), "wif".to_string()]);
    }

    #[test]
    fn currency_amounts_are_not_cashtags() {
        assert!(extract_cashtags("sold for US$50 profit").is_empty());
        assert!(extract_cashtags("$5 is not a ticker").is_empty());
    }
}
