use std::time::Duration;

use sponsornet_core::error::CoreError;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Sponsorship codes of the sponsors whose queues are kept warm. Empty
    /// means the network root only.
    pub warm_root_codes: Vec<String>,
    pub warm_interval: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var              | Default          |
    /// |----------------------|------------------|
    /// | `DATABASE_URL`       | required         |
    /// | `WARM_ROOT_CODES`    | network root     |
    /// | `WARM_INTERVAL_SECS` | `300`            |
    pub fn from_env() -> Result<Self, CoreError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| CoreError::Validation("DATABASE_URL must be set".to_string()))?;

        let warm_root_codes = parse_codes(&std::env::var("WARM_ROOT_CODES").unwrap_or_default());

        let warm_interval_secs: u64 = match std::env::var("WARM_INTERVAL_SECS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                CoreError::Validation(format!("WARM_INTERVAL_SECS has an invalid value '{raw}'"))
            })?,
            Err(_) => 300,
        };
        if warm_interval_secs == 0 {
            return Err(CoreError::Validation(
                "WARM_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            warm_root_codes,
            warm_interval: Duration::from_secs(warm_interval_secs),
        })
    }
}

/// Split a comma-separated list, dropping blanks.
fn parse_codes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}
