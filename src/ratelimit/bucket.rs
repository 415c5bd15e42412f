//! Continuous token bucket.

use super::rules::Policy;

/// Per-client, per-resource token state.
///
/// Tokens refill continuously at `limit / window` per second and are capped
/// at the policy's capacity. The bucket does not store its policy; the caller
/// passes the currently resolved one on every operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    /// Current allowance, `0 <= tokens <= capacity`
    tokens: f64,
    /// Unix time (seconds) of the last recalculation
    last_refill: f64,
}

impl TokenBucket {
    /// Create a full bucket for `policy` at time `now`.
    pub fn full(policy: &Policy, now: f64) -> Self {
        Self {
            tokens: policy.capacity(),
            last_refill: now,
        }
    }

    /// Current token count.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time of the last recalculation.
    pub fn last_refill(&self) -> f64 {
        self.last_refill
    }

    /// Add the tokens earned since the last refill and move the baseline to `now`.
    ///
    /// A clock that went backwards contributes zero elapsed time and leaves
    /// the baseline where it was.
    pub fn refill(&mut self, policy: &Policy, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        let capacity = policy.capacity();

        self.tokens = (self.tokens + elapsed * policy.refill_rate()).min(capacity);
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then take one token if at least one is available.
    ///
    /// Returns `true` when the token was taken. The baseline advances either way.
    pub fn try_take(&mut self, policy: &Policy, now: f64) -> bool {
        self.refill(policy, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens left.
    pub fn remaining(&self) -> u32 {
        self.tokens.max(0.0).floor() as u32
    }

    /// Seconds since the last refill, as seen at `now`.
    pub fn idle_for(&self, now: f64) -> f64 {
        now - self.last_refill
    }
}
