//! Configuration management for Turnstile.
//!
//! Settings are read once at startup from an optional YAML file, then
//! overridden by `TURNSTILE__*` environment variables (for example
//! `TURNSTILE__SERVER__HTTP_ADDR=0.0.0.0:8000`). Invalid configuration is
//! reported before the server binds.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Policy, PolicyRule, PolicyTable};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Policy applied when no rule matches
    #[serde(default)]
    pub default: Policy,

    /// Admit requests when the clock reading is unusable
    #[serde(default)]
    pub fail_open: bool,

    /// Per-path overrides, matched exactly and then by prefix in this order
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyRule>,

    /// Paths that are never rate limited (exact match)
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Idle bucket eviction
    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            default: Policy::default(),
            fail_open: false,
            policies: default_policies(),
            exempt_paths: default_exempt_paths(),
            janitor: JanitorConfig::default(),
        }
    }
}

fn default_policies() -> Vec<PolicyRule> {
    vec![
        PolicyRule::new("/api/chat/trip-planner", 20, 60),
        PolicyRule::new("/api/chat/support", 30, 60),
        PolicyRule::new("/api/chat/recommend", 30, 60),
        PolicyRule::new("/api/health", 1000, 60),
    ]
}

fn default_exempt_paths() -> Vec<String> {
    ["/", "/api/health", "/docs", "/openapi.json", "/redoc"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Janitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,

    /// Buckets idle longer than this are evicted
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval(),
            max_age_seconds: default_max_age(),
        }
    }
}

impl JanitorConfig {
    /// Sweep interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Maximum bucket idle time.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_max_age() -> u64 {
    3600
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(TurnstileError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policy_table()?;

        if let Some(path) = self
            .rate_limiting
            .exempt_paths
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            return Err(TurnstileError::Config(format!(
                "exempt path '{}' must start with '/'",
                path
            )));
        }

        let janitor = &self.rate_limiting.janitor;
        if janitor.interval_seconds == 0 {
            return Err(TurnstileError::Config(
                "janitor interval_seconds must be greater than zero".to_string(),
            ));
        }
        if janitor.max_age_seconds == 0 {
            return Err(TurnstileError::Config(
                "janitor max_age_seconds must be greater than zero".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(TurnstileError::Config(
                "logging level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl RateLimitingConfig {
    /// Build the policy lookup table.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::new(self.default, &self.policies)
    }
}
