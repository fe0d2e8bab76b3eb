use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use simplelog::LevelFilter;
use url::Url;

use crate::utils::bulk::BulkOptions;

/// Settings read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_identity: String,
    pub bind_addr: SocketAddr,
    pub results_base_url: Url,
    pub http_timeout: Duration,
    pub rate_interval: Duration,
    pub bulk_workers: usize,
    pub batch_workers: usize,
    pub bulk_deadline: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub log_level: LevelFilter,
}

// Reads an optional env var, falling back to a default.
fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name} has an invalid value {raw:?}: {e}")),
        _ => Ok(default),
    }
}

impl Config {
    // Loads the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let server_identity = std::env::var("SERVER_IDENTITY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("SERVER_IDENTITY environment variable not found")?;

        let mut base: String = var_or("RESULTS_BASE_URL", "http://results.nith.ac.in/".to_string())?;
        if !base.ends_with('/') {
            base.push('/');
        }
        let results_base_url = Url::parse(&base).context("RESULTS_BASE_URL is not a valid URL")?;

        Ok(Config {
            server_identity,
            bind_addr: var_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            results_base_url,
            http_timeout: Duration::from_secs(var_or("HTTP_TIMEOUT_SECS", 20)?),
            rate_interval: Duration::from_millis(var_or("RATE_INTERVAL_MS", 500)?),
            bulk_workers: var_or("BULK_WORKERS", 5)?,
            batch_workers: var_or("BATCH_WORKERS", 30)?,
            bulk_deadline: Duration::from_secs(var_or("BULK_DEADLINE_SECS", 60)?),
            max_attempts: var_or("MAX_ATTEMPTS", 5)?,
            backoff_base: Duration::from_millis(var_or("BACKOFF_BASE_MS", 1000)?),
            log_level: var_or("LOG_LEVEL", LevelFilter::Info)?,
        })
    }

    // Bulk settings for a run with the given pool size.
    pub fn bulk_options(&self, workers: usize) -> BulkOptions {
        BulkOptions {
            workers,
            min_interval: self.rate_interval,
            deadline: self.bulk_deadline,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
        }
    }
}
