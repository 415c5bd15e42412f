//! Sliding-window throttle for outbound calls.
//!
//! Unlike [`RateLimiter`](super::RateLimiter), which rejects inbound requests,
//! a [`SlidingWindowLimiter`] makes the caller wait until its next call fits
//! both a per-second and a per-minute budget. It is used to stay under vendor
//! API quotas.
//!
//! The gateway binary does not use this module; it is library API for
//! integration code that calls out to vendors:
//!
//! ```no_run
//! use turnstile::ratelimit::ThrottleRegistry;
//!
//! async fn embed_page(registry: &ThrottleRegistry) {
//!     let throttle = registry.get_or_create("jina", 50, Some(2));
//!     let waited = throttle.acquire().await;
//!     tracing::debug!(?waited, "Calling Jina");
//!     // send the request here
//! }
//!
//! let registry = ThrottleRegistry::with_presets();
//! assert!(registry.get("gemini").is_some());
//! # let _ = embed_page;
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Windows {
    /// Call times within the last second
    second: VecDeque<Instant>,
    /// Call times within the last minute
    minute: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune(&mut self.second, now, SECOND);
        prune(&mut self.minute, now, MINUTE);
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, max_age: Duration) {
    while window
        .front()
        .is_some_and(|&oldest| now.saturating_duration_since(oldest) > max_age)
    {
        window.pop_front();
    }
}

/// How long until one more call fits in a window of `capacity` calls per `span`.
///
/// Slots may lie in the future when earlier callers are still waiting.
fn wait_for(window: &VecDeque<Instant>, capacity: u32, now: Instant, span: Duration) -> Duration {
    if window.len() < capacity as usize {
        return Duration::ZERO;
    }
    // Every call up to and including this one has to age out first
    let blocking = window.len() - capacity as usize;
    window
        .get(blocking)
        .map(|&slot| (slot + span).saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}

/// Thread-safe two-window call throttle.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    per_minute: u32,
    per_second: u32,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    /// Create a throttle allowing `per_minute` calls per minute and
    /// `per_second` calls per second. Without an explicit per-second budget,
    /// `per_minute / 60 + 1` is used.
    pub fn new(per_minute: u32, per_second: Option<u32>) -> Self {
        Self {
            per_minute,
            per_second: per_second.unwrap_or(per_minute / 60 + 1),
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Calls allowed per minute.
    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Calls allowed per second.
    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// How long a call made at `now` would have to wait. Does not record anything.
    pub fn delay_at(&self, now: Instant) -> Duration {
        let mut windows = self.windows.lock();
        windows.prune(now);
        self.delay_locked(&windows, now)
    }

    fn delay_locked(&self, windows: &Windows, now: Instant) -> Duration {
        let second = wait_for(&windows.second, self.per_second, now, SECOND);
        let minute = wait_for(&windows.minute, self.per_minute, now, MINUTE);
        second.max(minute)
    }

    /// Reserve the next slot at `now` and return how long the caller must wait
    /// before using it.
    pub fn reserve_at(&self, now: Instant) -> Duration {
        let mut windows = self.windows.lock();
        windows.prune(now);

        let delay = self.delay_locked(&windows, now);
        let slot = now + delay;
        windows.second.push_back(slot);
        windows.minute.push_back(slot);

        delay
    }

    /// Wait until a call fits both windows, then record it.
    ///
    /// The slot is reserved under the lock and the sleep happens outside it,
    /// so concurrent callers queue behind each other without holding the lock.
    /// Returns the time waited.
    pub async fn acquire(&self) -> Duration {
        let delay = self.reserve_at(Instant::now());

        if !delay.is_zero() {
            debug!(wait_ms = delay.as_millis() as u64, "Throttling outbound call");
            tokio::time::sleep(delay).await;
        }

        delay
    }

    /// Forget all recorded calls.
    pub fn reset(&self) {
        let mut windows = self.windows.lock();
        windows.second.clear();
        windows.minute.clear();
    }
}

/// Named, shared throttles. The first configuration registered for a name wins.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    throttles: Mutex<HashMap<String, Arc<SlidingWindowLimiter>>>,
}

impl ThrottleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the vendor APIs the integration scripts call.
    pub fn with_presets() -> Self {
        let registry = Self::new();
        // Jina AI and Gemini free tiers allow about 60 requests per minute
        registry.get_or_create("jina", 50, Some(2));
        registry.get_or_create("gemini", 50, Some(2));
        // Self-hosted workflow automation
        registry.get_or_create("n8n", 120, Some(5));
        registry
    }

    /// Return the throttle named `name`, creating it with the given budgets
    /// if it does not exist yet.
    pub fn get_or_create(
        &self,
        name: &str,
        per_minute: u32,
        per_second: Option<u32>,
    ) -> Arc<SlidingWindowLimiter> {
        self.throttles
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SlidingWindowLimiter::new(per_minute, per_second)))
            .clone()
    }

    /// The throttle named `name`, if registered.
    pub fn get(&self, name: &str) -> Option<Arc<SlidingWindowLimiter>> {
        self.throttles.lock().get(name).cloned()
    }
}
