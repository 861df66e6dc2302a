//! Service configuration loaded from environment variables.

use crate::notify::NotifyMethod;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Length of one dedup window. Configured in whole minutes.
    pub window: Duration,
    pub notify_method: NotifyMethod,
    pub notify_timeout: Duration,
    pub notify_workers: usize,
    /// Pending notifications held before new ones are rejected.
    pub notify_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8085".to_string(),
            window: Duration::from_secs(60),
            notify_method: NotifyMethod::Get,
            notify_timeout: Duration::from_secs(5),
            notify_workers: 8,
            notify_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Optional:
    /// - `BIND_ADDR` (default "0.0.0.0:8085")
    /// - `WINDOW_MINUTES` (default 1, minimum 1)
    /// - `NOTIFY_METHOD`: `get` or `post` (default `get`)
    /// - `NOTIFY_TIMEOUT_SECS` (default 5)
    /// - `NOTIFY_WORKERS` (default 8)
    /// - `NOTIFY_QUEUE_CAPACITY` (default 1024)
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            bind_addr = %config.bind_addr,
            window_secs = config.window.as_secs(),
            notify_method = ?config.notify_method,
            notify_timeout_secs = config.notify_timeout.as_secs(),
            notify_workers = config.notify_workers,
            notify_queue_capacity = config.notify_queue_capacity,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = lookup("BIND_ADDR")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.bind_addr);
        let window_minutes: u64 = parse_var(&lookup, "WINDOW_MINUTES", 1)?;
        let notify_method = parse_var(&lookup, "NOTIFY_METHOD", defaults.notify_method)?;
        let notify_timeout_secs: u64 = parse_var(&lookup, "NOTIFY_TIMEOUT_SECS", 5)?;
        let notify_workers = parse_var(&lookup, "NOTIFY_WORKERS", defaults.notify_workers)?;
        let notify_queue_capacity = parse_var(
            &lookup,
            "NOTIFY_QUEUE_CAPACITY",
            defaults.notify_queue_capacity,
        )?;

        if window_minutes == 0 {
            bail!("WINDOW_MINUTES must be at least 1");
        }
        let Some(window_secs) = window_minutes.checked_mul(60) else {
            bail!("WINDOW_MINUTES is too large");
        };
        if notify_timeout_secs == 0 {
            bail!("NOTIFY_TIMEOUT_SECS must be at least 1");
        }
        if notify_workers == 0 {
            bail!("NOTIFY_WORKERS must be at least 1");
        }
        if notify_queue_capacity == 0 {
            bail!("NOTIFY_QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            bind_addr,
            window: Duration::from_secs(window_secs),
            notify_method,
            notify_timeout: Duration::from_secs(notify_timeout_secs),
            notify_workers,
            notify_queue_capacity,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}
