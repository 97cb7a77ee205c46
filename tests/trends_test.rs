use chrono::Utc;
use memepulse::trends::{top_hashtags, top_keywords, TrendAggregator};
use memepulse::types::{TagCount, TelegramMessageRow, TikTokRow, TimeRange};

fn video(id: &str, tags: &[&str]) -> TikTokRow {
    TikTokRow {
        id: None,
        video_id: id.to_string(),
        author: "creator".to_string(),
        description: String::new(),
        view_count: 100,
        hashtags: tags.iter().map(|t| t.to_string()).collect(),
        fetched_at: Utc::now(),
    }
}

fn message(text: &str) -> TelegramMessageRow {
    TelegramMessageRow {
        id: None,
        message_id: 1,
        channel_id: 1,
        text: text.to_string(),
        view_count: Some(10),
        sent_at: Utc::now(),
    }
}

#[test]
fn hashtag_counts_over_synthetic_videos() {
    let videos = vec![
        video("1", &["moon", "pump"]),
        video("2", &["moon"]),
        video("3", &["pump", "pump"]), // within-video duplicate
        video("4", &["doge", "moon"]),
        video("5", &["doge"]),
    ];

    let ranked = top_hashtags(&videos);
    assert_eq!(
        ranked,
        vec![
            TagCount { tag: "moon".to_string(), count: 3 },
            // doge and pump tie at 2; ties break lexicographically
            TagCount { tag: "doge".to_string(), count: 2 },
            TagCount { tag: "pump".to_string(), count: 2 },
        ]
    );
}

#[test]
fn keyword_counts_tally_every_occurrence() {
    let messages = vec![
        message("pepe pumping hard, pepe is back"),
        message("watching pepe and wif today"),
    ];
    let ranked = top_keywords(&messages);
    assert_eq!(ranked[0], TagCount { tag: "pepe".to_string(), count: 3 });
    assert!(ranked.contains(&TagCount { tag: "wif".to_string(), count: 1 }));
}

#[test]
fn last_updated_is_monotonic_across_every_range() {
    let aggregator = TrendAggregator::new();
    let ranges = [
        TimeRange::OneHour,
        TimeRange::Day,
        TimeRange::Week,
        TimeRange::Month,
        TimeRange::All,
    ];

    let mut previous = None;
    for _ in 0..3 {
        for range in ranges {
            let snapshot = aggregator.compute_snapshot(range, &[], &[]);
            if let Some(previous) = previous {
                assert!(
                    snapshot.last_updated >= previous,
                    "lastUpdated went backwards for {}",
                    range
                );
            }
            previous = Some(snapshot.last_updated);
        }
    }
}

#[test]
fn snapshot_sums_views_from_both_sources() {
    let aggregator = TrendAggregator::new();
    let videos = vec![video("1", &["moon"]), video("2", &[])];
    let messages = vec![message("gm"), message("gn")];

    let snapshot = aggregator.compute_snapshot(TimeRange::Day, &messages, &videos);
    assert_eq!(snapshot.video_count, 2);
    assert_eq!(snapshot.message_count, 2);
    assert_eq!(snapshot.total_views, 220);
    assert_eq!(snapshot.time_range, "24h");
}

#[test]
fn time_range_parsing_accepts_only_documented_values() {
    for value in ["1h", "24h", "7d", "30d", "all"] {
        assert!(TimeRange::parse(value).is_some(), "{} should parse", value);
    }
    for value in ["2h", "", "24H", "week"] {
        assert!(TimeRange::parse(value).is_none(), "{} should not parse", value);
    }
}
