//! Client configuration from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::http::DEFAULT_TIMEOUT;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

pub const ENV_API_URL: &str = "MAIZE_API_URL";
pub const ENV_TIMEOUT_MS: &str = "MAIZE_API_TIMEOUT_MS";
pub const ENV_DEBUG: &str = "MAIZE_API_DEBUG";
pub const ENV_RETRY_MAX: &str = "MAIZE_RETRY_MAX";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "MAIZE_RETRY_BASE_DELAY_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("MAIZE_API_URL must not be empty")]
    EmptyUrl,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Log request and response bodies.
    pub debug: bool,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            debug: false,
            retry: RetryPolicy {
                max_retries: DEFAULT_MAX_RETRIES,
                base_delay: DEFAULT_BASE_DELAY,
            },
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Loads `.env` if present, then reads the `MAIZE_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = match lookup(ENV_API_URL) {
            Some(url) if url.trim().is_empty() => return Err(ConfigError::EmptyUrl),
            Some(url) => url.trim().to_string(),
            None => defaults.base_url,
        };
        let timeout = parse_millis(&lookup, ENV_TIMEOUT_MS)?.unwrap_or(defaults.timeout);
        let debug = match lookup(ENV_DEBUG) {
            Some(value) => parse_bool(ENV_DEBUG, &value)?,
            None => defaults.debug,
        };
        let max_retries = match lookup(ENV_RETRY_MAX) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_RETRY_MAX,
                value,
                expected: "a non-negative integer",
            })?,
            None => defaults.retry.max_retries,
        };
        let base_delay = parse_millis(&lookup, ENV_RETRY_BASE_DELAY_MS)?.unwrap_or(defaults.retry.base_delay);

        Ok(Self {
            base_url,
            timeout,
            debug,
            retry: RetryPolicy {
                max_retries,
                base_delay,
            },
        })
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::Invalid {
            key,
            value,
            expected: "a duration in milliseconds",
        })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            expected: "a boolean",
        }),
    }
}
