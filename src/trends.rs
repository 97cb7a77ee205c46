use crate::types::{TagCount, TelegramMessageRow, TikTokRow, TimeRange, TrendSnapshot};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Hard cap on rows fed into one reduction, per source.
pub const ROW_CAP: usize = 500;
/// Entries kept in each top-N list.
pub const TOP_N: usize = 20;

lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "and", "for", "you", "this", "that", "with", "have", "has", "are",
        "was", "will", "just", "like", "about", "what", "when", "from", "your",
        "they", "them", "his", "her", "its", "our", "out", "not", "but", "all",
        "can", "get", "got", "now", "new", "one", "https", "http", "com", "www",
    ]
    .into_iter()
    .collect();
}

/// Computes dashboard snapshots. Holds only the monotonic `lastUpdated`
/// floor; everything else is a pure reduction over the rows handed in.
pub struct TrendAggregator {
    floor: Mutex<DateTime<Utc>>,
}

impl TrendAggregator {
    pub fn new() -> Self {
        Self {
            floor: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Stamp for an outgoing snapshot; never moves backwards even if the
    /// wall clock does.
    fn stamp(&self) -> DateTime<Utc> {
        let mut floor = self.floor.lock().unwrap();
        let now = Utc::now();
        let stamped = if now > *floor { now } else { *floor };
        *floor = stamped;
        stamped
    }

    pub fn compute_snapshot(
        &self,
        range: TimeRange,
        messages: &[TelegramMessageRow],
        videos: &[TikTokRow],
    ) -> TrendSnapshot {
        let total_views = videos.iter().map(|v| v.view_count).sum::<i64>()
            + messages.iter().filter_map(|m| m.view_count).sum::<i64>();

        TrendSnapshot {
            time_range: range.as_str().to_string(),
            message_count: messages.len(),
            video_count: videos.len(),
            total_views,
            top_hashtags: top_hashtags(videos),
            top_keywords: top_keywords(messages),
            last_updated: self.stamp(),
        }
    }
}

impl Default for TrendAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Hashtag frequencies across videos. Duplicate tags within a single video
/// count once; comparison is case-insensitive.
pub fn top_hashtags(videos: &[TikTokRow]) -> Vec<TagCount> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for video in videos {
        let unique: HashSet<String> = video
            .hashtags
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        for tag in unique {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }
    rank(counts)
}

/// Keyword frequencies over message text: every token occurrence counts.
pub fn top_keywords(messages: &[TelegramMessageRow]) -> Vec<TagCount> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for message in messages {
        for word in tokenize(&message.text) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    rank(counts)
}

/// Lowercased alphanumeric runs, minus stopwords, short words and bare
/// numbers.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| {
            w.len() > 2
                && !STOPWORDS.contains(w.as_str())
                && !w.chars().all(|c| c.is_ascii_digit())
        })
}

/// Count descending, tag ascending on ties, truncated to TOP_N.
fn rank(counts: HashMap<String, u32>) -> Vec<TagCount> {
    let mut ranked: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    ranked.truncate(TOP_N);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, tags: &[&str]) -> TikTokRow {
        TikTokRow {
            id: None,
            video_id: id.to_string(),
            author: "test".to_string(),
            description: String::new(),
            view_count: 0,
            hashtags: tags.iter().map(|t| t.to_string()).collect(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_tags_within_one_video_count_once() {
        let videos = vec![
            video("1", &["moon", "pump"]),
            video("2", &["moon"]),
            video("3", &["pump", "pump"]),
        ];
        let ranked = top_hashtags(&videos);
        assert_eq!(ranked.len(), 2);
        // tie on count 2 breaks lexicographically: moon before pump
        assert_eq!(ranked[0], TagCount { tag: "moon".into(), count: 2 });
        assert_eq!(ranked[1], TagCount { tag: "pump".into(), count: 2 });
    }

    #[test]
    fn tokenizer_drops_stopwords_and_numbers() {
        let words: Vec<String> = tokenize("The DOGE pump is 100 percent real https://t.me").collect();
        assert!(words.contains(&"doge".to_string()));
        assert!(words.contains(&"pump".to_string()));
        assert!(!words.contains(&"the".to_string()));
        assert!(!words.contains(&"100".to_string()));
        assert!(!words.contains(&"https".to_string()));
    }

    #[test]
    fn snapshot_timestamps_never_regress() {
        let aggregator = TrendAggregator::new();
        let first = aggregator.compute_snapshot(TimeRange::Day, &[], &[]);
        let second = aggregator.compute_snapshot(TimeRange::Day, &[], &[]);
        assert!(second.last_updated >= first.last_updated);
    }
}
