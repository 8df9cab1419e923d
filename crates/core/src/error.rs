use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TasqError {
    #[error("client not connected to any worker")]
    NotConnected,

    #[error("result for unknown job name: {0}")]
    UnknownCorrelationKey(String),

    #[error("a job named {0} was already scheduled on this client")]
    DuplicateName(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid connection url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pool error: {0}")]
    Pool(String),
}

impl TasqError {
    /// Whether the broker link is gone for good. The gathering loop exits on
    /// these and keeps going on everything else.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
