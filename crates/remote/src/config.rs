//! File-based configuration.
//!
//! ```toml
//! [client]
//! url = "zmq://10.0.0.4:9000"
//! connect_timeout_ms = 2000
//!
//! [pool]
//! endpoints = ["zmq://10.0.0.4:9000", "zmq://10.0.0.5:9000"]
//! ```
//!
//! Environment variables override the file: `TASQ_URL` -> `client.url`,
//! `TASQ_CONNECT_TIMEOUT_MS` -> `client.connect_timeout_ms`,
//! `TASQ_RECV_BACKOFF_MS` -> `client.recv_backoff_ms`, and
//! `TASQ_POOL_ENDPOINTS` (comma-separated) -> `pool.endpoints`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tasq_core::config::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECV_BACKOFF_MS};
use tasq_core::{ClientConfig, TasqError};

use crate::broker_url::BrokerUrl;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasqConfig {
    pub client: ClientConfig,
    pub pool: PoolConfig,
}

/// Endpoints of a client pool. Every client shares the same timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout_ms: u64,
    pub recv_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            recv_backoff_ms: DEFAULT_RECV_BACKOFF_MS,
        }
    }
}

impl PoolConfig {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// One client config per endpoint, in endpoint order.
    pub fn client_configs(&self) -> Vec<ClientConfig> {
        self.endpoints
            .iter()
            .map(|url| ClientConfig {
                url: url.clone(),
                connect_timeout_ms: self.connect_timeout_ms,
                recv_backoff_ms: self.recv_backoff_ms,
                ..ClientConfig::default()
            })
            .collect()
    }
}

impl TasqConfig {
    /// Parse config from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, TasqError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TasqError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = lookup("TASQ_URL") {
            self.client.url = v;
        }
        if let Some(ms) = lookup("TASQ_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.client.connect_timeout_ms = ms;
        }
        if let Some(ms) = lookup("TASQ_RECV_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.client.recv_backoff_ms = ms;
        }
        if let Some(v) = lookup("TASQ_POOL_ENDPOINTS") {
            self.pool.endpoints = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Every connection string must parse and timeouts must be positive.
    pub fn validate(&self) -> Result<(), TasqError> {
        BrokerUrl::parse(&self.client.url)?;
        for endpoint in &self.pool.endpoints {
            BrokerUrl::parse(endpoint)?;
        }
        if self.client.connect_timeout_ms == 0 || self.pool.connect_timeout_ms == 0 {
            return Err(TasqError::Config(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
