use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Default)]
pub struct RateLimiter {
    inner: Mutex<HashMap<String, RateState>>,
}

#[derive(Clone, Copy)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after: Option<Duration>,
}

/// A fixed-window budget: `limit` hits per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub name: &'static str,
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn per_minute(name: &'static str, limit: u64) -> Self {
        Self {
            name,
            limit,
            window: Duration::from_secs(60),
        }
    }

    pub const fn per_second(name: &'static str, limit: u64) -> Self {
        Self {
            name,
            limit,
            window: Duration::from_secs(1),
        }
    }
}

struct RateState {
    window_start: Instant,
    window: Duration,
    count: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check_rule(&self, rule: RateLimitRule, subject: &str) -> RateLimitOutcome {
        let key = format!("{}:{subject}", rule.name);
        self.check(&key, rule.limit, rule.window).await
    }

    pub async fn check(&self, key: &str, limit: u64, window: Duration) -> RateLimitOutcome {
        if limit == 0 {
            return RateLimitOutcome {
                allowed: false,
                remaining: 0,
                retry_after: Some(window),
            };
        }

        let mut guard = self.inner.lock().await;
        if guard.len() >= PRUNE_THRESHOLD {
            guard.retain(|_, state| state.window_start.elapsed() < state.window);
        }

        let entry = guard.entry(key.to_string()).or_insert_with(|| RateState {
            window_start: Instant::now(),
            window,
            count: 0,
        });

        let elapsed = entry.window_start.elapsed();
        if elapsed >= window {
            entry.window_start = Instant::now();
            entry.count = 0;
        }
        entry.window = window;

        entry.count += 1;
        if entry.count > limit {
            let retry_after = window.saturating_sub(entry.window_start.elapsed());
            return RateLimitOutcome {
                allowed: false,
                remaining: 0,
                retry_after: Some(retry_after),
            };
        }

        RateLimitOutcome {
            allowed: true,
            remaining: limit.saturating_sub(entry.count),
            retry_after: None,
        }
    }
}
