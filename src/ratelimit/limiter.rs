//! Core rate limiter implementation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use super::key::BucketKey;
use super::rules::{Policy, PolicyTable};

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// Unix time (seconds) at which the bucket is guaranteed to be full again
    pub reset_at: u64,
    /// The resolved policy's limit
    pub limit: u32,
    /// The resolved policy's window in seconds
    pub window: u64,
}

impl Decision {
    /// When a rejected caller should retry, as a Unix timestamp.
    pub fn retry_after(&self) -> u64 {
        self.reset_at
    }
}

/// Bucket map plus the newest timestamp seen, guarded together.
#[derive(Debug, Default)]
struct Store {
    /// client key -> resource key -> bucket
    buckets: HashMap<String, HashMap<String, TokenBucket>>,
    /// Latest finite timestamp passed to a check, if any
    last_tick: Option<f64>,
}

/// In-memory token-bucket rate limiter keyed by client and resource.
///
/// This struct is thread-safe and is meant to be shared as `Arc<RateLimiter>`.
/// All bucket state sits behind one mutex that is held only for the in-memory
/// arithmetic of a single check.
pub struct RateLimiter {
    /// Bucket store
    store: Mutex<Store>,
    /// Policy lookup table
    policies: PolicyTable,
    /// Time source for [`RateLimiter::check_now`]
    clock: Arc<dyn Clock>,
    /// Admit requests that arrive with an unusable timestamp
    fail_open: bool,
}

impl RateLimiter {
    /// Create a rate limiter using the wall clock.
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            policies,
            clock: Arc::new(SystemClock),
            fail_open: false,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Admit requests whose timestamp is not a finite number instead of
    /// evaluating them at the last known tick.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// The policy table in use.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Check the rate limit for `client_key` on `resource_key` at the clock's current time.
    pub fn check_now(&self, client_key: &str, resource_key: &str) -> Decision {
        self.check(client_key, resource_key, self.clock.now())
    }

    /// Check and consume one token for `client_key` on `resource_key` at time `now`.
    ///
    /// Never fails: rejection is reported through [`Decision::allowed`].
    pub fn check(&self, client_key: &str, resource_key: &str, now: f64) -> Decision {
        let policy = self.policies.resolve(resource_key);

        trace!(
            client = client_key,
            resource = resource_key,
            limit = policy.limit,
            window = policy.window_seconds,
            "Checking rate limit"
        );

        let mut store = self.store.lock();

        let now = if now.is_finite() {
            let tick = store.last_tick.map_or(now, |tick| tick.max(now));
            store.last_tick = Some(tick);
            now
        } else if self.fail_open {
            let reset_at = reset_at(self.fallback_tick(&store), &policy);
            drop(store);
            warn!(
                client = client_key,
                resource = resource_key,
                "Unusable timestamp, admitting request (fail-open)"
            );
            return Decision {
                allowed: true,
                remaining: policy.limit,
                reset_at,
                limit: policy.limit,
                window: policy.window_seconds,
            };
        } else {
            self.fallback_tick(&store)
        };

        let mut created = false;
        let resources = store.buckets.entry(client_key.to_string()).or_default();
        let bucket = resources
            .entry(resource_key.to_string())
            .or_insert_with(|| {
                created = true;
                TokenBucket::full(&policy, now)
            });

        let allowed = bucket.try_take(&policy, now);
        let remaining = bucket.remaining();
        drop(store);

        // Logging happens after the lock is released
        if created {
            debug!(
                client = client_key,
                resource = resource_key,
                limit = policy.limit,
                window = policy.window_seconds,
                "Creating new bucket"
            );
        }

        if !allowed {
            debug!(
                client = client_key,
                resource = resource_key,
                "Rate limit exceeded"
            );
        }

        Decision {
            allowed,
            remaining,
            reset_at: reset_at(now, &policy),
            limit: policy.limit,
            window: policy.window_seconds,
        }
    }

    /// Timestamp used in place of a non-finite one: the newest tick seen, or
    /// the clock when nothing has been checked yet.
    fn fallback_tick(&self, store: &Store) -> f64 {
        store
            .last_tick
            .unwrap_or_else(|| self.clock.now())
    }

    /// Copy of the bucket for a client and resource, if one exists.
    pub fn bucket(&self, client_key: &str, resource_key: &str) -> Option<TokenBucket> {
        let store = self.store.lock();
        store
            .buckets
            .get(client_key)
            .and_then(|resources| resources.get(resource_key))
            .copied()
    }

    /// Keys of buckets idle for more than `max_age_secs` at `now`.
    ///
    /// The lock is held only while copying keys out.
    pub fn stale_keys(&self, max_age_secs: f64, now: f64) -> Vec<BucketKey> {
        let store = self.store.lock();
        store
            .buckets
            .iter()
            .flat_map(|(client, resources)| {
                resources
                    .iter()
                    .filter(move |(_, bucket)| bucket.idle_for(now) > max_age_secs)
                    .map(move |(resource, _)| BucketKey::new(client, resource))
            })
            .collect()
    }

    /// Remove the bucket for `key` if it is still stale, dropping the client
    /// entry once it has no buckets left.
    ///
    /// Returns `true` if a bucket was removed. A bucket touched since it was
    /// reported by [`RateLimiter::stale_keys`] is kept.
    pub fn evict_if_stale(&self, key: &BucketKey, max_age_secs: f64, now: f64) -> bool {
        let mut store = self.store.lock();

        let Some(resources) = store.buckets.get_mut(&key.client) else {
            return false;
        };

        let still_stale = resources
            .get(&key.resource)
            .is_some_and(|bucket| bucket.idle_for(now) > max_age_secs);

        if still_stale {
            resources.remove(&key.resource);
        }

        if resources.is_empty() {
            store.buckets.remove(&key.client);
        }

        still_stale
    }

    /// Remove every bucket idle for more than `max_age_secs` at `now`.
    ///
    /// Keys are snapshotted first and each is re-validated under the lock
    /// before deletion, so live traffic is never blocked for a whole scan.
    /// Returns the number of buckets removed.
    pub fn sweep(&self, max_age_secs: f64, now: f64) -> usize {
        self.stale_keys(max_age_secs, now)
            .iter()
            .filter(|key| self.evict_if_stale(key, max_age_secs, now))
            .count()
    }

    /// Number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.store.lock().buckets.len()
    }

    /// Number of live buckets across all clients.
    pub fn bucket_count(&self) -> usize {
        self.store
            .lock()
            .buckets
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Clear all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.lock().buckets.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PolicyTable::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.policies)
            .field("fail_open", &self.fail_open)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

fn reset_at(now: f64, policy: &Policy) -> u64 {
    now.floor().max(0.0) as u64 + policy.window_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::PolicyRule;

    const T0: f64 = 1_700_000_000.0;

    fn gateway_limiter() -> RateLimiter {
        let rules = vec![
            PolicyRule::new("/api/chat/trip-planner", 20, 60),
            PolicyRule::new("/api/chat/support", 30, 60),
            PolicyRule::new("/api/chat/recommend", 30, 60),
        ];
        RateLimiter::new(PolicyTable::new(Policy::default(), &rules).unwrap())
    }

    fn limiter_with(limit: u32, window: u64) -> RateLimiter {
        RateLimiter::new(PolicyTable::with_default(Policy::new(limit, window)).unwrap())
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = gateway_limiter();
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.client_count(), 0);
    }

    #[test]
    fn test_check_creates_full_bucket() {
        let limiter = limiter_with(10, 60);

        let decision = limiter.check("client", "/api/x", T0);

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.bucket("client", "/api/x").unwrap().last_refill(), T0);
    }

    #[test]
    fn test_exactly_capacity_admitted_without_elapsed_time() {
        for capacity in [1u32, 5, 20, 100] {
            let limiter = limiter_with(capacity, 60);
            let allowed = (0..capacity + 25)
                .filter(|_| limiter.check("client", "/r", T0).allowed)
                .count();
            assert_eq!(allowed, capacity as usize);
        }
    }

    #[test]
    fn test_trip_planner_scenario() {
        let limiter = gateway_limiter();

        for i in 1..=20 {
            let decision = limiter.check("1.2.3.4", "/api/chat/trip-planner", T0);
            assert!(decision.allowed, "Request {} should be allowed", i);
            assert_eq!(decision.limit, 20);
            assert_eq!(decision.window, 60);
        }

        let decision = limiter.check("1.2.3.4", "/api/chat/trip-planner", T0 + 0.25);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after(), T0 as u64 + 60);
    }

    #[test]
    fn test_full_recovery_after_window() {
        let limiter = limiter_with(10, 60);
        for _ in 0..10 {
            limiter.check("client", "/r", T0);
        }
        assert!(!limiter.check("client", "/r", T0).allowed);

        let bucket = {
            let mut bucket = limiter.bucket("client", "/r").unwrap();
            bucket.refill(&Policy::new(10, 60), T0 + 60.0);
            bucket
        };
        assert!((bucket.tokens() - 10.0).abs() < 1e-9);

        // After a full window the next check sees a full bucket again
        let decision = limiter.check("client", "/r", T0 + 60.0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
    }

    #[test]
    fn test_remaining_is_monotonic_without_elapsed_time() {
        let limiter = limiter_with(15, 60);
        let mut previous = u32::MAX;
        for _ in 0..20 {
            let decision = limiter.check("client", "/r", T0);
            assert!(decision.remaining <= previous);
            previous = decision.remaining;
        }
    }

    #[test]
    fn test_clients_are_isolated() {
        let limiter = gateway_limiter();
        for _ in 0..25 {
            limiter.check("client-a", "/api/chat/trip-planner", T0);
        }
        assert!(!limiter.check("client-a", "/api/chat/trip-planner", T0).allowed);

        let decision = limiter.check("client-b", "/api/chat/trip-planner", T0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 19);
    }

    #[test]
    fn test_resources_are_isolated() {
        let limiter = gateway_limiter();
        for _ in 0..35 {
            limiter.check("client", "/api/chat/support", T0);
        }
        assert!(!limiter.check("client", "/api/chat/support", T0).allowed);

        let decision = limiter.check("client", "/api/chat/recommend", T0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 29);
        assert_eq!(limiter.client_count(), 1);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_rejected_probe_advances_baseline() {
        let limiter = limiter_with(60, 60);
        for _ in 0..60 {
            limiter.check("client", "/r", T0);
        }

        let decision = limiter.check("client", "/r", T0 + 0.5);
        assert!(!decision.allowed);
        assert_eq!(limiter.bucket("client", "/r").unwrap().last_refill(), T0 + 0.5);

        // The half token earned before the probe is kept
        assert!(limiter.check("client", "/r", T0 + 1.0).allowed);
    }

    #[test]
    fn test_backwards_clock_grants_nothing() {
        let limiter = limiter_with(2, 60);
        limiter.check("client", "/r", T0);
        limiter.check("client", "/r", T0);

        let decision = limiter.check("client", "/r", T0 - 3600.0);
        assert!(!decision.allowed);
        assert_eq!(limiter.bucket("client", "/r").unwrap().last_refill(), T0);
    }

    #[test]
    fn test_non_finite_time_uses_last_tick() {
        let limiter = limiter_with(1, 60);
        assert!(limiter.check("client", "/r", T0).allowed);

        let decision = limiter.check("client", "/r", f64::NAN);
        assert!(!decision.allowed);
        assert_eq!(decision.reset_at, T0 as u64 + 60);
    }

    #[test]
    fn test_non_finite_time_before_any_tick_uses_clock() {
        let limiter = limiter_with(5, 60).with_clock(Arc::new(ManualClock::new(T0)));

        let decision = limiter.check("client", "/r", f64::NAN);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_at, T0 as u64 + 60);
        assert_eq!(limiter.bucket("client", "/r").unwrap().last_refill(), T0);
    }

    #[test]
    fn test_fail_open_before_any_tick_reports_clock_reset() {
        let limiter = limiter_with(5, 60)
            .with_clock(Arc::new(ManualClock::new(T0)))
            .with_fail_open(true);

        let decision = limiter.check("client", "/r", f64::NAN);
        assert!(decision.allowed);
        assert_eq!(decision.reset_at, T0 as u64 + 60);
        assert!(limiter.bucket("client", "/r").is_none());
    }

    #[test]
    fn test_non_finite_time_fail_open() {
        let limiter = limiter_with(1, 60).with_fail_open(true);
        assert!(limiter.check("client", "/r", T0).allowed);

        let decision = limiter.check("client", "/r", f64::INFINITY);
        assert!(decision.allowed);
        assert_eq!(limiter.bucket("client", "/r").unwrap().tokens(), 0.0);
    }

    #[test]
    fn test_check_now_uses_injected_clock() {
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = limiter_with(1, 10).with_clock(clock.clone());

        assert!(limiter.check_now("client", "/r").allowed);
        assert!(!limiter.check_now("client", "/r").allowed);

        clock.advance(10.0);
        assert!(limiter.check_now("client", "/r").allowed);
    }

    #[test]
    fn test_sweep_evicts_only_stale_buckets() {
        let max_age = 3600.0;
        let limiter = limiter_with(10, 60);
        let now = T0 + 10_000.0;

        limiter.check("old", "/r", now - (max_age + 1.0));
        limiter.check("fresh", "/r", now - (max_age - 1.0));
        limiter.check("mixed", "/old", now - (max_age + 1.0));
        limiter.check("mixed", "/new", now);

        let removed = limiter.sweep(max_age, now);

        assert_eq!(removed, 2);
        assert!(limiter.bucket("old", "/r").is_none());
        assert!(limiter.bucket("fresh", "/r").is_some());
        assert!(limiter.bucket("mixed", "/old").is_none());
        assert!(limiter.bucket("mixed", "/new").is_some());
        // Empty client entries are dropped
        assert_eq!(limiter.client_count(), 2);
    }

    #[test]
    fn test_evict_revalidates_under_lock() {
        let limiter = limiter_with(10, 60);
        limiter.check("client", "/r", T0);

        let stale = limiter.stale_keys(60.0, T0 + 120.0);
        assert_eq!(stale, vec![BucketKey::new("client", "/r")]);

        // Touched between snapshot and eviction
        limiter.check("client", "/r", T0 + 119.0);

        assert!(!limiter.evict_if_stale(&stale[0], 60.0, T0 + 120.0));
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_capacity() {
        let limiter = Arc::new(limiter_with(500, 3600));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.check("client", "/r", T0).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 500);
    }

    #[test]
    fn test_clear_buckets() {
        let limiter = limiter_with(10, 60);
        limiter.check("client", "/r", T0);
        assert_eq!(limiter.bucket_count(), 1);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
