use crate::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Shared reconnect policy for every long-lived upstream stream: doubling
/// delay from `base`, at most `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

#[derive(Debug)]
pub struct Reconnector {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the policy is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.base * 2u32.pow(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Drive a connect closure under the policy. The closure resolves `Ok` when
/// a session was established and later ended cleanly (the counter resets),
/// `Err` when connecting or the session failed. Returns once the policy is
/// exhausted by consecutive failures.
pub async fn run_with_reconnect<C, Fut>(name: &str, policy: BackoffPolicy, mut connect: C)
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ApiError>>,
{
    let mut reconnector = Reconnector::new(policy);
    loop {
        match connect().await {
            Ok(()) => {
                info!("[{}] Stream ended cleanly", name);
                reconnector.reset();
            }
            Err(e) => {
                warn!("[{}] Stream failed: {}", name, e);
            }
        }

        match reconnector.next_delay() {
            Some(delay) => {
                info!(
                    "[{}] Reconnecting in {:?} (attempt {}/{})",
                    name,
                    delay,
                    reconnector.attempts(),
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!(
                    "[{}] Giving up after {} failed attempts",
                    name, policy.max_attempts
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_give_up() {
        let mut r = Reconnector::new(BackoffPolicy::default());
        let delays: Vec<_> = std::iter::from_fn(|| r.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
        assert_eq!(r.next_delay(), None);
    }

    #[test]
    fn reset_restores_the_sequence() {
        let mut r = Reconnector::new(BackoffPolicy::default());
        r.next_delay();
        r.next_delay();
        r.reset();
        assert_eq!(r.next_delay(), Some(Duration::from_secs(1)));
    }
}
