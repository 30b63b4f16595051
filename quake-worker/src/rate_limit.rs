use std::time;

use tokio::time::Instant;

/// Enforces a minimum spacing between consecutive external geocoding calls.
///
/// There is a single worker, so this is a plain value borrowed mutably for each call rather than
/// shared state. Time is read from tokio's clock so tests can pause and advance it.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: time::Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_spacing: time::Duration) -> Self {
        Self {
            min_spacing,
            last_call: None,
        }
    }

    pub fn min_spacing(&self) -> time::Duration {
        self.min_spacing
    }

    /// How long a call made right now would have to wait.
    pub fn delay(&self) -> time::Duration {
        match self.last_call {
            Some(last_call) => {
                (last_call + self.min_spacing).saturating_duration_since(Instant::now())
            }
            None => time::Duration::ZERO,
        }
    }

    /// Wait until a call is allowed, then record it as made.
    pub async fn acquire(&mut self) {
        if let Some(last_call) = self.last_call {
            tokio::time::sleep_until(last_call + self.min_spacing).await;
        }
        self.last_call = Some(Instant::now());
    }
}
