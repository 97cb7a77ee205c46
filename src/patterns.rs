use crate::supabase::SupabaseClient;
use crate::types::{PatternDetectionRow, PatternInsightRow};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    MentionSurge,
    ViewSpike,
    PriceBreakout,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MentionSurge => "mention_surge",
            Self::ViewSpike => "view_spike",
            Self::PriceBreakout => "price_breakout",
        })
    }
}

/// A detected pattern before persistence.
#[derive(Debug, Clone)]
pub struct Detection {
    pub token_uri: String,
    pub kind: PatternKind,
    pub strength: f64,
    pub detected_at: DateTime<Utc>,
}

/// Window comparisons over ingested series. All checks compare the most
/// recent hour against the hour before it.
pub struct PatternDetector {
    /// Factor the recent window must exceed the prior window by.
    surge_factor: f64,
    /// Fractional margin above the prior high that counts as a breakout.
    breakout_margin: f64,
    /// Minimum activity in the recent window before a surge is considered.
    min_recent: usize,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self {
            surge_factor: 3.0,
            breakout_margin: 0.1,
            min_recent: 5,
        }
    }
}

impl PatternDetector {
    pub fn detect_mention_surge(
        &self,
        token_uri: &str,
        now: DateTime<Utc>,
        mention_times: &[DateTime<Utc>],
    ) -> Option<Detection> {
        let hour = Duration::hours(1);
        let recent = mention_times.iter().filter(|&&t| now - t < hour).count();
        let prior = mention_times
            .iter()
            .filter(|&&t| now - t >= hour && now - t < hour * 2)
            .count();

        if recent < self.min_recent {
            return None;
        }
        let ratio = recent as f64 / prior.max(1) as f64;
        (ratio >= self.surge_factor).then(|| Detection {
            token_uri: token_uri.to_string(),
            kind: PatternKind::MentionSurge,
            strength: ratio,
            detected_at: now,
        })
    }

    pub fn detect_view_spike(
        &self,
        token_uri: &str,
        now: DateTime<Utc>,
        view_points: &[(DateTime<Utc>, i64)],
    ) -> Option<Detection> {
        let hour = Duration::hours(1);
        let recent: i64 = view_points
            .iter()
            .filter(|(t, _)| now - *t < hour)
            .map(|(_, v)| v)
            .sum();
        let prior: i64 = view_points
            .iter()
            .filter(|(t, _)| now - *t >= hour && now - *t < hour * 2)
            .map(|(_, v)| v)
            .sum();

        if recent < self.min_recent as i64 {
            return None;
        }
        let ratio = recent as f64 / prior.max(1) as f64;
        (ratio >= self.surge_factor).then(|| Detection {
            token_uri: token_uri.to_string(),
            kind: PatternKind::ViewSpike,
            strength: ratio,
            detected_at: now,
        })
    }

    /// Breakout: the newest price clears every prior price in the series by
    /// the configured margin. `prices` is ordered newest-first, the way the
    /// price query returns it.
    pub fn detect_price_breakout(
        &self,
        token_uri: &str,
        now: DateTime<Utc>,
        prices: &[f64],
    ) -> Option<Detection> {
        let (&latest, prior) = prices.split_first()?;
        let prior_high = prior.iter().copied().fold(f64::NAN, f64::max);
        if !prior_high.is_finite() || prior_high <= 0.0 {
            return None;
        }
        let ratio = latest / prior_high;
        (ratio >= 1.0 + self.breakout_margin).then(|| Detection {
            token_uri: token_uri.to_string(),
            kind: PatternKind::PriceBreakout,
            strength: ratio,
            detected_at: now,
        })
    }
}

/// Suppresses repeat detections of the same kind for the same token inside
/// a cooldown window, so a sustained surge produces one row, not one per
/// poll tick.
pub struct DetectionDeduper {
    cooldown: Duration,
    recent: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl DetectionDeduper {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            recent: RwLock::new(HashMap::new()),
        }
    }

    pub async fn should_filter(&self, detection: &Detection) -> bool {
        let key = format!("{}:{}", detection.token_uri, detection.kind);
        let mut recent = self.recent.write().await;
        match recent.get(&key) {
            Some(&last) if detection.detected_at - last < self.cooldown => true,
            _ => {
                recent.insert(key, detection.detected_at);
                false
            }
        }
    }
}

/// Writes surviving detections through to Supabase along with a refreshed
/// per-token insight summary.
pub struct PatternTracker {
    supabase: SupabaseClient,
    deduper: DetectionDeduper,
}

impl PatternTracker {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self {
            supabase,
            deduper: DetectionDeduper::new(Duration::hours(1)),
        }
    }

    /// Returns how many detections were stored.
    pub async fn record(&self, detections: Vec<Detection>) -> usize {
        let mut stored = 0;
        for detection in detections {
            if self.deduper.should_filter(&detection).await {
                debug!(
                    "[Patterns] Filtered repeat {} for {}",
                    detection.kind, detection.token_uri
                );
                continue;
            }

            let row = PatternDetectionRow {
                id: None,
                token_uri: detection.token_uri.clone(),
                pattern_type: detection.kind.to_string(),
                strength: detection.strength,
                detected_at: detection.detected_at,
            };
            if let Err(e) = self.supabase.insert_pattern_detection(&row).await {
                warn!("[Patterns] Failed to store detection: {}", e);
                continue;
            }

            let insight = PatternInsightRow {
                id: None,
                token_uri: detection.token_uri.clone(),
                summary: summarize(&detection),
                updated_at: detection.detected_at,
            };
            if let Err(e) = self.supabase.upsert_pattern_insight(&insight).await {
                warn!("[Patterns] Failed to refresh insight: {}", e);
            }
            stored += 1;
        }
        stored
    }
}

fn summarize(detection: &Detection) -> String {
    match detection.kind {
        PatternKind::MentionSurge => format!(
            "Mentions running {:.1}x the previous hour",
            detection.strength
        ),
        PatternKind::ViewSpike => format!(
            "Video views running {:.1}x the previous hour",
            detection.strength
        ),
        PatternKind::PriceBreakout => format!(
            "Price broke {:.0}% above its recent high",
            (detection.strength - 1.0) * 100.0
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surge_requires_minimum_activity_and_factor() {
        let detector = PatternDetector::default();
        let now = Utc::now();
        let minutes = |m: i64| now - Duration::minutes(m);

        // 6 recent mentions vs 1 prior -> 6x surge
        let times: Vec<_> = (0..6).map(|i| minutes(i * 5)).chain([minutes(90)]).collect();
        let detection = detector
            .detect_mention_surge("pepe", now, &times)
            .expect("surge");
        assert!(detection.strength >= 3.0);

        // 3 recent mentions is below the activity floor
        let quiet: Vec<_> = (0..3).map(|i| minutes(i * 5)).collect();
        assert!(detector.detect_mention_surge("pepe", now, &quiet).is_none());
    }

    #[test]
    fn breakout_needs_margin_over_prior_high() {
        let detector = PatternDetector::default();
        let now = Utc::now();
        assert!(detector
            .detect_price_breakout("pepe", now, &[1.2, 1.0, 0.9])
            .is_some());
        assert!(detector
            .detect_price_breakout("pepe", now, &[1.05, 1.0, 0.9])
            .is_none());
        assert!(detector.detect_price_breakout("pepe", now, &[1.0]).is_none());
    }

    #[tokio::test]
    async fn deduper_filters_within_cooldown() {
        let deduper = DetectionDeduper::new(Duration::hours(1));
        let detection = Detection {
            token_uri: "pepe".to_string(),
            kind: PatternKind::MentionSurge,
            strength: 4.0,
            detected_at: Utc::now(),
        };
        assert!(!deduper.should_filter(&detection).await);
        assert!(deduper.should_filter(&detection).await);

        let later = Detection {
            detected_at: detection.detected_at + Duration::hours(2),
            ..detection.clone()
        };
        assert!(!deduper.should_filter(&later).await);
    }
}
