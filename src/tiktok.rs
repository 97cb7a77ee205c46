use crate::error::{check_status, ApiError};
use crate::supabase::SupabaseClient;
use crate::types::{MentionRow, MentionSource, TikTokRow};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

const QUERY_URL: &str = "https://open.tiktokapis.com/v2/research/video/query/";
const QUERY_FIELDS: &str = "id,username,video_description,view_count";
const POLL_INTERVAL: Duration = Duration::from_secs(300);
const MAX_RESULTS: u32 = 100;

/// Search terms the scraper sweeps each cycle.
const SEARCH_TERMS: &[&str] = &["memecoin", "solana memecoin", "pumpfun"];

#[derive(Deserialize)]
struct QueryResponse {
    data: Option<QueryData>,
    error: Option<QueryError>,
}

#[derive(Deserialize)]
struct QueryError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
    id: i64,
    username: String,
    video_description: Option<String>,
    view_count: Option<i64>,
}

/// Sweeps the TikTok video query API for memecoin content and writes video
/// rows plus hashtag mentions.
pub struct TikTokScraper {
    client: Client,
    access_token: String,
    supabase: SupabaseClient,
}

impl TikTokScraper {
    pub fn new(access_token: &str, supabase: SupabaseClient) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.to_string(),
            supabase,
        }
    }

    async fn fetch_videos(&self, term: &str) -> Result<Vec<Video>, ApiError> {
        let body = serde_json::json!({
            "query": {
                "and": [
                    { "operation": "IN", "field_name": "keyword", "field_values": [term] }
                ]
            },
            "max_count": MAX_RESULTS,
        });
        let response = self
            .client
            .post(QUERY_URL)
            .query(&[("fields", QUERY_FIELDS)])
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("tiktok: {}", e)))?;

        if let Some(error) = parsed.error {
            // The API reports success through an error object with code "ok".
            if error.code != "ok" {
                return Err(ApiError::Decode(format!(
                    "tiktok {}: {}",
                    error.code, error.message
                )));
            }
        }
        Ok(parsed.data.map(|d| d.videos).unwrap_or_default())
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tick.tick().await;
            for term in SEARCH_TERMS {
                let videos = match self.fetch_videos(term).await {
                    Ok(videos) => videos,
                    Err(e) => {
                        warn!("[TikTok] Query for '{}' failed: {}", term, e);
                        Vec::new()
                    }
                };
                if videos.is_empty() {
                    continue;
                }
                info!("[TikTok] {} video(s) for '{}'", videos.len(), term);
                for video in videos {
                    self.store_video(video).await;
                }
            }
        }
    }

    async fn store_video(&self, video: Video) {
        let description = video.video_description.unwrap_or_default();
        let hashtags = extract_hashtags(&description);
        let fetched_at = Utc::now();

        let row = TikTokRow {
            id: None,
            video_id: video.id.to_string(),
            author: video.username,
            description,
            view_count: video.view_count.unwrap_or(0),
            hashtags: hashtags.clone(),
            fetched_at,
        };
        if let Err(e) = self.supabase.upsert_tiktok(&row).await {
            warn!("[TikTok] Video upsert failed for {}: {}", row.video_id, e);
            return;
        }

        let mentions: Vec<MentionRow> = hashtags
            .into_iter()
            .map(|term| MentionRow {
                id: None,
                source: MentionSource::TikTok,
                term,
                mentioned_at: fetched_at,
            })
            .collect();
        if let Err(e) = self.supabase.insert_mentions(&mentions).await {
            warn!("[TikTok] Mention insert failed: {}", e);
        }
    }
}

/// `#hashtag` runs in a description: alphanumeric/underscore, 2-30 chars,
/// at least one letter. Lowercased, deduped preserving first-seen order.
/// Tags come only from the text itself.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '#' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
            j += 1;
        }
        let tag: String = chars[i + 1..j].iter().collect();
        if (2..=30).contains(&tag.len()) && tag.chars().any(|c| c.is_ascii_alphabetic()) {
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
    fn hashtags_come_only_from_the_text() {
        let tags = extract_hashtags("new #MemeCoin dropping #moon #moon #2");
        assert_eq!(tags, vec!["memecoin".to_string(), "moon".to_string()]);
        assert!(extract_hashtags("no tags here").is_empty());
    }
}
