//! Background eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Periodically sweeps a [`RateLimiter`] for buckets that have been idle
/// longer than `max_age`, bounding memory used by one-off or spoofed clients.
#[derive(Debug, Clone)]
pub struct Janitor {
    limiter: Arc<RateLimiter>,
    interval: Duration,
    max_age: Duration,
}

impl Janitor {
    /// Create a janitor for `limiter`.
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration, max_age: Duration) -> Self {
        Self {
            limiter,
            interval,
            max_age,
        }
    }

    /// Run one sweep at the limiter's current time. Returns the number of
    /// buckets removed.
    pub fn sweep(&self) -> usize {
        let now = self.limiter.now();
        let removed = self.limiter.sweep(self.max_age.as_secs_f64(), now);

        if removed > 0 {
            info!(
                removed = removed,
                remaining = self.limiter.bucket_count(),
                "Evicted idle rate limit buckets"
            );
        } else {
            debug!("Janitor sweep found no idle buckets");
        }

        removed
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The loop exits when `shutdown` changes or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                max_age_secs = self.max_age.as_secs(),
                "Starting janitor"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.changed() => {
                        info!("Janitor stopped");
                        break;
                    }
                }
            }
        })
    }
}
