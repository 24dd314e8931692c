use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PrismError, Result};

/// Sliding-window limiter: at most `max_requests` acquisitions per `window`.
///
/// Call [`acquire`](RateLimiter::acquire) before each backend request.
/// Scoped to this process.
pub struct RateLimiter {
    name: String,
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, max_requests: usize, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(PrismError::Config(
                "max_requests must be a positive integer".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(PrismError::Config(
                "rate limit window must be positive".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            max_requests,
            window,
            requests: Mutex::new(VecDeque::with_capacity(max_requests)),
        })
    }

    pub async fn acquire(&self) {
        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        while requests
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            requests.pop_front();
        }

        if requests.len() >= self.max_requests {
            if let Some(&oldest) = requests.front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                tokio::time::sleep(wait).await;
                let now = Instant::now();
                while requests
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    requests.pop_front();
                }
            }
        }

        requests.push_back(Instant::now());
    }
}
