use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::engine::retry::{BackoffStrategy, RetryPolicy};
use crate::middleware::Whitelist;

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs the engine on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    pub host: String,
    pub port: u16,

    pub dispatcher_url: Option<String>,
    pub dispatcher_token: Option<String>,

    pub whitelist: Whitelist,

    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
    pub concurrency: usize,
    pub claim_lease: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            batch_size: 100,
            concurrency: 8,
            claim_lease: Duration::from_secs(300),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 5,
            run_migrations: true,
            host: "0.0.0.0".to_string(),
            port: 3296,
            dispatcher_url: None,
            dispatcher_token: None,
            whitelist: Whitelist::default(),
            engine: EngineConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry = RetryPolicy {
            backoff: match env::var("RETRY_BACKOFF") {
                Ok(raw) => BackoffStrategy::parse(&raw).unwrap_or_else(|| {
                    warn!("Unknown RETRY_BACKOFF '{}', retrying every sweep", raw);
                    BackoffStrategy::None
                }),
                Err(_) => BackoffStrategy::None,
            },
            initial_delay: seconds_or("RETRY_INITIAL_DELAY_SECS", 60),
            max_delay: seconds_or("RETRY_MAX_DELAY_SECS", 3600),
        };

        Self {
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections),
            run_migrations: env_or("RUN_MIGRATIONS", defaults.run_migrations),
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            dispatcher_url: non_empty_var("DISPATCHER_URL"),
            dispatcher_token: non_empty_var("DISPATCHER_TOKEN"),
            whitelist: Whitelist::new(
                env_or("WHITELIST_ENABLED", false),
                &env::var("WHITELIST_IPS").unwrap_or_default(),
            ),
            engine: EngineConfig {
                dispatch_timeout: Duration::from_secs(env_or("DISPATCH_TIMEOUT_SECS", 15)),
                retry,
            },
            scheduler: SchedulerConfig {
                enabled: env_or("SCHEDULER_ENABLED", true),
                interval: Duration::from_secs(env_or::<u64>("SCHEDULER_INTERVAL_SECS", 60).max(1)),
                batch_size: env_or::<i64>("SCHEDULER_BATCH_SIZE", 100).max(1),
                concurrency: env_or::<usize>("SCHEDULER_CONCURRENCY", 8).max(1),
                claim_lease: Duration::from_secs(env_or("SCHEDULER_CLAIM_LEASE_SECS", 300)),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value '{}' for {}, using default", raw, key);
            default
        }),
        Err(_) => default,
    }
}

/// Seconds as a `chrono::Duration`. Values a `Duration` cannot hold fall
/// back to the default.
fn seconds_or(key: &str, default_secs: i64) -> chrono::Duration {
    let secs = env_or(key, default_secs);
    chrono::Duration::try_seconds(secs).unwrap_or_else(|| {
        warn!("{} of {} seconds is out of range, using default", key, secs);
        chrono::Duration::seconds(default_secs)
    })
}
