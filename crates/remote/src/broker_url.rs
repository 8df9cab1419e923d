//! Connection strings of the form `scheme://host:port?key=value`.

use std::fmt;
use std::str::FromStr;

use tasq_core::TasqError;
use url::Url;

pub const DEFAULT_ZMQ_HOST: &str = "127.0.0.1";
pub const DEFAULT_ZMQ_PORT: u16 = 9000;
pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_QUEUE: &str = "redis-queue";
pub const DEFAULT_AMQP_HOST: &str = "localhost";
pub const DEFAULT_AMQP_PORT: u16 = 5672;
pub const DEFAULT_AMQP_QUEUE: &str = "amqp-queue";

/// A parsed broker connection string.
///
/// | scheme | broker | query keys |
/// |---|---|---|
/// | `zmq`, `tcp`, `unix` | PUSH/PULL sockets on `port` / `plport` | `plport` (default `port + 1`) |
/// | `redis` | key-store lists | `db` (default 0), `name` |
/// | `amqp` | message queue | `name` |
///
/// A string without a scheme is read as `zmq`. Unknown query keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerUrl {
    Zmq {
        host: String,
        port: u16,
        plport: u16,
        unix_socket: bool,
    },
    Redis {
        host: String,
        port: u16,
        db: i64,
        name: String,
    },
    Amqp {
        host: String,
        port: u16,
        name: String,
    },
}

impl BrokerUrl {
    pub fn parse(raw: &str) -> Result<Self, TasqError> {
        let normalized = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("zmq://{raw}")
        };
        let invalid = |reason: String| TasqError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };
        let parsed = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        let host = parsed.host_str().filter(|h| !h.is_empty());
        let extras = query_pairs(parsed.query());

        match parsed.scheme() {
            scheme @ ("zmq" | "tcp" | "unix") => {
                let port = parsed.port().unwrap_or(DEFAULT_ZMQ_PORT);
                let plport = match lookup(&extras, "plport") {
                    Some(v) => v
                        .parse::<u16>()
                        .map_err(|_| invalid(format!("plport {v:?} is not a port")))?,
                    None => 0,
                };
                let plport = if plport == 0 {
                    port.checked_add(1)
                        .ok_or_else(|| invalid(format!("no pull port after {port}")))?
                } else {
                    plport
                };
                Ok(Self::Zmq {
                    host: host.unwrap_or(DEFAULT_ZMQ_HOST).to_string(),
                    port,
                    plport,
                    unix_socket: scheme == "unix",
                })
            }
            "redis" => {
                let db = match lookup(&extras, "db") {
                    Some(v) => v
                        .parse::<i64>()
                        .map_err(|_| invalid(format!("db {v:?} is not a number")))?,
                    None => 0,
                };
                Ok(Self::Redis {
                    host: host.unwrap_or(DEFAULT_REDIS_HOST).to_string(),
                    port: parsed.port().unwrap_or(DEFAULT_REDIS_PORT),
                    db,
                    name: lookup(&extras, "name").unwrap_or(DEFAULT_REDIS_QUEUE).to_string(),
                })
            }
            "amqp" => Ok(Self::Amqp {
                host: host.unwrap_or(DEFAULT_AMQP_HOST).to_string(),
                port: parsed.port().unwrap_or(DEFAULT_AMQP_PORT),
                name: lookup(&extras, "name").unwrap_or(DEFAULT_AMQP_QUEUE).to_string(),
            }),
            other => Err(TasqError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Zmq { unix_socket: true, .. } => "unix",
            Self::Zmq { .. } => "zmq",
            Self::Redis { .. } => "redis",
            Self::Amqp { .. } => "amqp",
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Zmq { host, .. } | Self::Redis { host, .. } | Self::Amqp { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Zmq { port, .. } | Self::Redis { port, .. } | Self::Amqp { port, .. } => *port,
        }
    }
}

/// Split a query string on `&` and on `?`, so `?db=1?name=q` works as well
/// as the standard `?db=1&name=q`.
fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split(['&', '?'])
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

impl FromStr for BrokerUrl {
    type Err = TasqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zmq {
                host,
                port,
                plport,
                ..
            } => write!(f, "{}://{host}:{port}?plport={plport}", self.scheme()),
            Self::Redis {
                host,
                port,
                db,
                name,
            } => write!(f, "redis://{host}:{port}?db={db}&name={name}"),
            Self::Amqp { host, port, name } => write!(f, "amqp://{host}:{port}?name={name}"),
        }
    }
}
