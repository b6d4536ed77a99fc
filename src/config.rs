//! Console settings read from the environment (optionally via a `.env` file).

use crate::error::ConfigError;
use crate::scope::Scope;
use std::time::Duration;

pub const ENV_BFF_URL: &str = "REGISTRY_BFF_URL";
pub const ENV_NAMESPACE: &str = "REGISTRY_NAMESPACE";
pub const ENV_MODEL_REGISTRY: &str = "REGISTRY_MODEL_REGISTRY";
pub const ENV_REQUEST_TIMEOUT: &str = "REGISTRY_REQUEST_TIMEOUT_SECS";
pub const ENV_REFRESH: &str = "REGISTRY_REFRESH_SECS";

pub const DEFAULT_BFF_URL: &str = "http://localhost:4000";
pub const BFF_API_VERSION: &str = "v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct ConsoleConfig {
    /// Base URL of the BFF, e.g. `http://localhost:4000`.
    pub bff_url: String,
    pub api_version: String,
    pub scope: Scope,
    /// Registry to select instead of the first one listed.
    pub model_registry: Option<String>,
    pub request_timeout: Duration,
    /// Poll interval for list views. Unset disables polling.
    pub refresh_rate: Option<Duration>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            bff_url: DEFAULT_BFF_URL.into(),
            api_version: BFF_API_VERSION.into(),
            scope: Scope::cluster(),
            model_registry: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_rate: None,
        }
    }
}

impl ConsoleConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = ConsoleConfig::default();

        if let Some(url) = get(ENV_BFF_URL) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    key: ENV_BFF_URL,
                    value: url,
                });
            }
            config.bff_url = url;
        }
        if let Some(ns) = get(ENV_NAMESPACE) {
            config.scope = ns.parse()?;
        }
        config.model_registry = get(ENV_MODEL_REGISTRY);
        if let Some(secs) = get(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = Duration::from_secs(parse_secs(ENV_REQUEST_TIMEOUT, &secs)?);
        }
        if let Some(secs) = get(ENV_REFRESH) {
            config.refresh_rate = Some(Duration::from_secs(parse_secs(ENV_REFRESH, &secs)?));
        }
        Ok(config)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}
