//! Sliding-window limit on job starts for one pool instance.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use coursegen_core::config::worker::RateLimitConfig;

/// Allows at most `max` job starts in any window of `window` length.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter. A `max` of zero is treated as one.
    pub fn new(max: u32, window: Duration) -> Self {
        let max = (max as usize).max(1);
        Self {
            max,
            window,
            starts: Mutex::new(VecDeque::with_capacity(max)),
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max, Duration::from_millis(config.duration_ms))
    }

    /// Wait until another start fits in the window.
    ///
    /// Does not reserve the slot; call [`RateLimiter::record`] once a job
    /// was actually claimed.
    pub async fn until_ready(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                let now = Instant::now();
                Self::evict(&mut starts, now, self.window);
                if starts.len() < self.max {
                    return;
                }
                match starts.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a job start.
    pub async fn record(&self) {
        let mut starts = self.starts.lock().await;
        let now = Instant::now();
        Self::evict(&mut starts, now, self.window);
        starts.push_back(now);
    }

    fn evict(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = starts.front() {
            if now.saturating_duration_since(*oldest) >= window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }
}
