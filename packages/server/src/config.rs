//! Environment-driven server configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use actors::EngineConfig;
use db::DbConfig;
use jobs_core::{AdmissionPolicy, QueueConfig};

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub upload_prefix: String,
    pub db: DbConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?;

        let mut engine = EngineConfig::default()
            .with_concurrency(parse_or(&get, "WORKER_CONCURRENCY", 4usize)?)
            .with_lease_ttl(Duration::from_secs(parse_or(&get, "JOB_LEASE_SECS", 300u64)?));

        if parse_bool(&get, "JOB_REAPER_ENABLED")? {
            let secs = parse_or(&get, "JOB_REAPER_INTERVAL_SECS", 30u64)?;
            engine = engine.with_reaper(Duration::from_secs(secs));
        }
        if let Some(dir) = get("QUEUE_STATE_DIR") {
            engine = engine.with_queue_state_dir(dir);
        }

        let mut queue = QueueConfig::default();
        if get("QUEUE_MAX_SIZE").is_some() {
            queue = queue.with_max_size(parse_or(&get, "QUEUE_MAX_SIZE", 0usize)?);
        }
        engine = engine.with_queue(queue);

        if let Some(prefix) = get("RESULT_PREFIX") {
            engine = engine.with_result_prefix(prefix);
        }
        let max_upload_mb = parse_or(&get, "MAX_UPLOAD_MB", 16u64)?;
        engine = engine.with_admission(AdmissionPolicy::default().with_max_upload_mb(max_upload_mb));

        if engine.concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            upload_prefix: get("UPLOAD_PREFIX").unwrap_or_else(|| "uploads".to_string()),
            db: DbConfig::from_env(),
            engine,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool<G>(get: &G, var: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(value) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}
