use std::str::FromStr;
use std::time::Duration;

use sponsornet_core::error::CoreError;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Without
/// `REDIS_URL` the engine keeps its position queues in process memory.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Write attempts per placement before giving up (default: `5`).
    pub max_attempts: u32,
    /// Deepest level the fallback scan descends below the sponsor.
    /// `None` (the default) scans without limit.
    pub max_scan_depth: Option<u32>,
    /// Bound on every position-cache call (default: 50 ms).
    pub cache_timeout: Duration,
    /// Bound on every node-store call (default: 5 s).
    pub store_timeout: Duration,
    /// Lifetime of cached downline statistics (default: 30 s).
    pub stats_ttl: Duration,
    /// Redis connection URL for the position cache.
    pub redis_url: Option<String>,
    /// Key prefix for Redis position queues (default: `sponsornet`).
    pub cache_key_prefix: String,
    /// Consecutive Redis failures that open the circuit breaker (default: `8`).
    pub breaker_failure_threshold: u32,
    /// How long an open breaker keeps the cache marked unavailable (default: 3 s).
    pub breaker_open_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_scan_depth: None,
            cache_timeout: Duration::from_millis(50),
            store_timeout: Duration::from_secs(5),
            stats_ttl: Duration::from_secs(30),
            redis_url: None,
            cache_key_prefix: "sponsornet".to_string(),
            breaker_failure_threshold: 8,
            breaker_open_duration: Duration::from_millis(3000),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default      |
    /// |----------------------------|--------------|
    /// | `PLACEMENT_MAX_ATTEMPTS`   | `5`          |
    /// | `PLACEMENT_MAX_SCAN_DEPTH` | unset        |
    /// | `CACHE_TIMEOUT_MS`         | `50`         |
    /// | `STORE_TIMEOUT_MS`         | `5000`       |
    /// | `STATS_TTL_SECS`           | `30`         |
    /// | `REDIS_URL`                | unset        |
    /// | `CACHE_KEY_PREFIX`         | `sponsornet` |
    /// | `CACHE_BREAKER_THRESHOLD`  | `8`          |
    /// | `CACHE_BREAKER_OPEN_MS`    | `3000`       |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let max_attempts: u32 = env_or("PLACEMENT_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(CoreError::Validation(
                "PLACEMENT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let max_scan_depth = match non_empty_var("PLACEMENT_MAX_SCAN_DEPTH") {
            Some(raw) => Some(parse_var("PLACEMENT_MAX_SCAN_DEPTH", &raw)?),
            None => None,
        };

        Ok(Self {
            max_attempts,
            max_scan_depth,
            cache_timeout: Duration::from_millis(env_or("CACHE_TIMEOUT_MS", 50)?),
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 5000)?),
            stats_ttl: Duration::from_secs(env_or("STATS_TTL_SECS", 30)?),
            redis_url: non_empty_var("REDIS_URL"),
            cache_key_prefix: non_empty_var("CACHE_KEY_PREFIX")
                .unwrap_or(defaults.cache_key_prefix),
            breaker_failure_threshold: env_or(
                "CACHE_BREAKER_THRESHOLD",
                defaults.breaker_failure_threshold,
            )?,
            breaker_open_duration: Duration::from_millis(env_or("CACHE_BREAKER_OPEN_MS", 3000)?),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::Validation(format!("{name} has an invalid value '{raw}'")))
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, CoreError> {
    match non_empty_var(name) {
        Some(raw) => parse_var(name, &raw),
        None => Ok(default),
    }
}
