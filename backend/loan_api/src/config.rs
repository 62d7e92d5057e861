//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the REST API server
    pub api_port: u16,
    /// Deadline applied to every request's protocol context
    pub request_timeout_secs: u64,
    /// Time allowed for in-flight work after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// Number of per-loan lock shards in the protocol
    pub lock_shards: usize,
    /// Where funding notifications are POSTed; log-only when unset
    pub notify_webhook_url: Option<String>,
    /// Bounded size of the notification queue
    pub notify_queue_capacity: usize,
    /// Per-delivery HTTP timeout
    pub notify_timeout_secs: u64,
    /// Delivery attempts per notification before it is dropped
    pub notify_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            api_port: parse_or("API_PORT", 8080)?,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 15)?,
            shutdown_grace_secs: parse_or("SHUTDOWN_GRACE_SECS", 10)?,
            lock_shards: parse_or("LOCK_SHARDS", loan_protocol::DEFAULT_SHARDS)?,
            notify_webhook_url: env_var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            notify_queue_capacity: parse_or("NOTIFY_QUEUE_CAPACITY", 1024)?,
            notify_timeout_secs: parse_or("NOTIFY_TIMEOUT_SECS", 5)?,
            notify_max_attempts: parse_or("NOTIFY_MAX_ATTEMPTS", 3)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lock_shards == 0 {
            return Err(ServiceError::Config("LOCK_SHARDS must be > 0".to_string()));
        }
        if self.notify_queue_capacity == 0 {
            return Err(ServiceError::Config(
                "NOTIFY_QUEUE_CAPACITY must be > 0".to_string(),
            ));
        }
        if self.notify_max_attempts == 0 {
            return Err(ServiceError::Config(
                "NOTIFY_MAX_ATTEMPTS must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_port: 8080,
            request_timeout_secs: 15,
            shutdown_grace_secs: 10,
            lock_shards: loan_protocol::DEFAULT_SHARDS,
            notify_webhook_url: None,
            notify_queue_capacity: 1024,
            notify_timeout_secs: 5,
            notify_max_attempts: 3,
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ServiceError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServiceError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}
