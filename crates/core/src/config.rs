use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub const DEFAULT_URL: &str = "zmq://127.0.0.1:9000";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RECV_BACKOFF_MS: u64 = 50;

/// Settings for a single client, resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Broker connection string, e.g. `zmq://10.0.0.4:9000` or `redis://cache:6379?db=2`.
    pub url: String,
    /// Upper bound on establishing the broker link.
    pub connect_timeout_ms: u64,
    /// Pause after a transient receive error before the gathering loop retries.
    pub recv_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            url: DEFAULT_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            recv_backoff_ms: DEFAULT_RECV_BACKOFF_MS,
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TASQ_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TASQ_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            url: profiled_env_or(p, "TASQ_URL", DEFAULT_URL),
            connect_timeout_ms: profiled_env_u64(
                p,
                "TASQ_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            ),
            recv_backoff_ms: profiled_env_u64(
                p,
                "TASQ_RECV_BACKOFF_MS",
                DEFAULT_RECV_BACKOFF_MS,
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn recv_backoff(&self) -> Duration {
        Duration::from_millis(self.recv_backoff_ms)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  url:             {}", self.url);
        tracing::info!("  connect_timeout: {}ms", self.connect_timeout_ms);
        tracing::info!("  recv_backoff:    {}ms", self.recv_backoff_ms);
    }
}
