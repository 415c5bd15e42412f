//! Rate limit policies and path matching.
//!
//! A policy table maps request paths to a `(limit, window)` pair. Lookup tries
//! an exact match first, then the first declared rule whose path is a prefix
//! of the request path, and finally falls back to the default policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Default number of requests allowed per window.
pub const DEFAULT_LIMIT: u32 = 100;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// The capacity and window governing a resource's request rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Maximum requests per window (bucket capacity)
    pub limit: u32,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl Policy {
    /// Create a new policy.
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Bucket capacity as a float.
    pub fn capacity(&self) -> f64 {
        f64::from(self.limit)
    }

    /// Tokens regained per second.
    pub fn refill_rate(&self) -> f64 {
        self.capacity() / self.window_seconds as f64
    }

    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::Config(format!(
                "{}: limit must be greater than zero",
                what
            )));
        }
        if self.window_seconds == 0 {
            return Err(TurnstileError::Config(format!(
                "{}: window_seconds must be greater than zero",
                what
            )));
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW_SECS)
    }
}

/// A configured override: requests whose path equals or starts with `path`
/// are governed by `limit` per `window_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Path or path prefix this rule applies to
    pub path: String,
    /// Maximum requests per window
    pub limit: u32,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl PolicyRule {
    /// Create a new rule.
    pub fn new(path: impl Into<String>, limit: u32, window_seconds: u64) -> Self {
        Self {
            path: path.into(),
            limit,
            window_seconds,
        }
    }

    /// The policy this rule carries.
    pub fn policy(&self) -> Policy {
        Policy::new(self.limit, self.window_seconds)
    }
}

/// Immutable policy lookup table built once at startup.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    /// Exact path lookups
    exact: HashMap<String, Policy>,
    /// Rules in declaration order, scanned for prefix matches
    ordered: Vec<(String, Policy)>,
    /// Fallback when nothing matches
    default: Policy,
}

impl PolicyTable {
    /// Build a table from a default policy and rules in declaration order.
    ///
    /// Rejects zero limits or windows, empty paths and duplicate paths.
    pub fn new(default: Policy, rules: &[PolicyRule]) -> Result<Self> {
        default.validate("default policy")?;

        let mut seen = HashSet::with_capacity(rules.len());
        let mut exact = HashMap::with_capacity(rules.len());
        let mut ordered = Vec::with_capacity(rules.len());

        for rule in rules {
            if rule.path.is_empty() {
                return Err(TurnstileError::Config(
                    "policy path must not be empty".to_string(),
                ));
            }
            if !seen.insert(rule.path.as_str()) {
                return Err(TurnstileError::Config(format!(
                    "duplicate policy for path '{}'",
                    rule.path
                )));
            }

            let policy = rule.policy();
            policy.validate(&format!("policy for '{}'", rule.path))?;

            exact.insert(rule.path.clone(), policy);
            ordered.push((rule.path.clone(), policy));
        }

        Ok(Self {
            exact,
            ordered,
            default,
        })
    }

    /// A table with only the default policy.
    pub fn with_default(default: Policy) -> Result<Self> {
        Self::new(default, &[])
    }

    /// Resolve the policy for a resource key.
    ///
    /// The first declared prefix wins, even when a later rule is a longer match.
    pub fn resolve(&self, resource_key: &str) -> Policy {
        if let Some(policy) = self.exact.get(resource_key) {
            return *policy;
        }

        self.ordered
            .iter()
            .find(|(prefix, _)| resource_key.starts_with(prefix.as_str()))
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default)
    }

    /// The fallback policy.
    pub fn default_policy(&self) -> Policy {
        self.default
    }

    /// Number of configured rules.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            ordered: Vec::new(),
            default: Policy::default(),
        }
    }
}
