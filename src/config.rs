use crate::batch::DEFAULT_ITEM_DELAY;
use crate::fetch::RetryPolicy;
use crate::http::DEFAULT_USER_AGENT;
use crate::logbook::DEFAULT_CAPACITY;
use crate::page::DEFAULT_SITE_ROOT;
use crate::pipeline::ManifestFailurePolicy;
use crate::proxy::{ProxyConfigError, ProxyCredential, parse_pool};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PROXY_POOL is not set")]
    MissingProxyPool,
    #[error("PROXY_POOL is invalid: {0}")]
    Proxy(#[from] ProxyConfigError),
    #[error("MANIFEST_FAILURE_POLICY is invalid: {0}")]
    ManifestPolicy(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub proxy_pool: Vec<ProxyCredential>,
    pub site_root: String,
    pub upstream_timeout: Duration,
    pub sheet_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub item_delay: Duration,
    pub log_capacity: usize,
    pub manifest_policy: ManifestFailurePolicy,
    pub user_agent: String,
    pub request_max_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Numeric knobs fall back to their defaults when absent or unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_pool = lookup("PROXY_POOL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingProxyPool)?;
        let proxy_pool = parse_pool(&raw_pool)?;

        let manifest_policy = match lookup("MANIFEST_FAILURE_POLICY") {
            Some(value) if !value.trim().is_empty() => {
                ManifestFailurePolicy::from_str(&value).map_err(ConfigError::ManifestPolicy)?
            }
            _ => ManifestFailurePolicy::default(),
        };

        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let positive = |key: &str, default: u64| -> u64 {
            Some(number(key, default))
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };
        let text = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            port: lookup("PORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .unwrap_or(3847),
            proxy_pool,
            site_root: text("SITE_ROOT", DEFAULT_SITE_ROOT)
                .trim_end_matches('/')
                .to_string(),
            upstream_timeout: Duration::from_secs(positive("UPSTREAM_TIMEOUT_SECS", 30)),
            sheet_timeout: Duration::from_secs(positive("SHEET_TIMEOUT_SECS", 60)),
            connect_timeout: Duration::from_secs(positive("HTTP_CONNECT_TIMEOUT_SECS", 10)),
            retry: RetryPolicy {
                max_attempts: positive("FETCH_MAX_ATTEMPTS", 3) as u32,
                backoff_unit: Duration::from_millis(number("FETCH_BACKOFF_MS", 1000)),
            },
            item_delay: Duration::from_millis(number(
                "BATCH_ITEM_DELAY_MS",
                DEFAULT_ITEM_DELAY.as_millis() as u64,
            )),
            log_capacity: positive("LOG_CAPACITY", DEFAULT_CAPACITY as u64) as usize,
            manifest_policy,
            user_agent: text("USER_AGENT", DEFAULT_USER_AGENT),
            request_max_bytes: positive("REQUEST_MAX_BYTES", 256 * 1024) as usize,
        })
    }
}
