//! Broker connections: one adapter per transport behind [`BrokerConnection`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tasq_core::{Job, JobResult, TasqError};
use tokio::sync::watch;

use crate::broker_url::BrokerUrl;

pub mod amqp;
pub mod memory;
pub mod redis;
pub mod zmq;

pub use amqp::AmqpConnection;
pub use memory::MemoryBroker;
pub use redis::RedisConnection;
pub use zmq::ZmqConnection;

/// Channel to a broker: jobs go out through `send`, results come back
/// through `recv`.
///
/// Lifecycle calls are idempotent. A connection is owned by exactly one
/// client, which shares it only with its own gathering loop.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open the link. Fails with [`TasqError::Closed`] after `close`.
    async fn connect(&self) -> Result<(), TasqError>;

    /// Drop the link; a later `connect` may open it again.
    async fn disconnect(&self) -> Result<(), TasqError>;

    /// Drop the link and release everything for good.
    async fn close(&self) -> Result<(), TasqError>;

    /// Transmit one job. Failures surface as [`TasqError::SendFailed`].
    async fn send(&self, job: &Job) -> Result<(), TasqError>;

    /// Wait for the next result.
    ///
    /// `Ok(None)` signals a transient no-data condition (poll timeout, link
    /// going down). While the link is down this waits for it to come back.
    /// Once the connection is closed it returns [`TasqError::Closed`].
    async fn recv(&self) -> Result<Option<JobResult>, TasqError>;

    /// Jobs still queued on the broker, for transports that can list them.
    async fn pending_jobs(&self) -> Result<Option<Vec<Job>>, TasqError> {
        Ok(None)
    }

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// Build the connection for a parsed connection string.
pub fn from_url(
    url: &BrokerUrl,
    connect_timeout: Duration,
) -> Result<Arc<dyn BrokerConnection>, TasqError> {
    let connection: Arc<dyn BrokerConnection> = match url {
        BrokerUrl::Zmq {
            host,
            port,
            plport,
            unix_socket,
        } => Arc::new(ZmqConnection::new(
            host,
            *port,
            *plport,
            *unix_socket,
            connect_timeout,
        )),
        BrokerUrl::Redis {
            host,
            port,
            db,
            name,
        } => Arc::new(RedisConnection::new(host, *port, *db, name, connect_timeout)?),
        BrokerUrl::Amqp { host, port, name } => {
            Arc::new(AmqpConnection::new(host, *port, name, connect_timeout)?)
        }
    };
    Ok(connection)
}

/// State of a connection's link to its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
    Closed,
}

/// Observable link state shared by the adapters.
///
/// Receive paths wait on it instead of holding a socket lock while the link
/// is down, and abandon an in-flight receive as soon as it leaves `Up`.
#[derive(Debug)]
pub(crate) struct Link {
    tx: watch::Sender<LinkStatus>,
}

impl Link {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkStatus::Down);
        Self { tx }
    }

    pub(crate) fn status(&self) -> LinkStatus {
        *self.tx.borrow()
    }

    /// Move to `status` unless already closed. Returns the previous status.
    pub(crate) fn set(&self, status: LinkStatus) -> LinkStatus {
        let mut previous = status;
        self.tx.send_if_modified(|current| {
            previous = *current;
            if *current == LinkStatus::Closed || *current == status {
                return false;
            }
            *current = status;
            true
        });
        previous
    }

    /// `Err(Closed)` once closed, `Err(SendFailed)` while down.
    pub(crate) fn ensure_up(&self) -> Result<(), TasqError> {
        match self.status() {
            LinkStatus::Up => Ok(()),
            LinkStatus::Down => Err(TasqError::SendFailed("broker link is down".into())),
            LinkStatus::Closed => Err(TasqError::Closed),
        }
    }

    /// Wait until the link is up. `Err(Closed)` if it gets closed instead.
    pub(crate) async fn wait_up(&self) -> Result<(), TasqError> {
        let mut rx = self.tx.subscribe();
        let status = *rx
            .wait_for(|s| *s != LinkStatus::Down)
            .await
            .map_err(|_| TasqError::Closed)?;
        match status {
            LinkStatus::Up => Ok(()),
            _ => Err(TasqError::Closed),
        }
    }

    /// Resolve once the link is no longer up.
    pub(crate) async fn wait_down(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| *s != LinkStatus::Up).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_is_terminal() {
        let link = Link::new();
        assert_eq!(link.set(LinkStatus::Up), LinkStatus::Down);
        assert_eq!(link.set(LinkStatus::Closed), LinkStatus::Up);
        assert_eq!(link.set(LinkStatus::Up), LinkStatus::Closed);
        assert_eq!(link.status(), LinkStatus::Closed);
        assert!(matches!(link.wait_up().await, Err(TasqError::Closed)));
        assert!(matches!(link.ensure_up(), Err(TasqError::Closed)));
    }

    #[tokio::test]
    async fn wait_up_wakes_on_connect() {
        let link = Arc::new(Link::new());
        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.wait_up().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        link.set(LinkStatus::Up);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_down_wakes_on_disconnect() {
        let link = Arc::new(Link::new());
        assert!(matches!(link.ensure_up(), Err(TasqError::SendFailed(_))));
        link.set(LinkStatus::Up);
        assert!(link.ensure_up().is_ok());

        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.wait_down().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        link.set(LinkStatus::Down);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_down never woke")
            .unwrap();
    }

    #[test]
    fn zmq_url_builds_a_zmq_connection() {
        let url = BrokerUrl::parse("tcp://127.0.0.1:9000").unwrap();
        let conn = from_url(&url, Duration::from_secs(1)).unwrap();
        assert!(conn.describe().contains("tcp://127.0.0.1:9001"));
    }

    #[test]
    fn unix_url_sends_and_receives_over_ipc() {
        let url = BrokerUrl::parse("unix://localhost:9000").unwrap();
        let conn = from_url(&url, Duration::from_secs(1)).unwrap();
        assert_eq!(
            conn.describe(),
            "zmq push=ipc:///tmp/tasq/localhost-9000.sock pull=ipc:///tmp/tasq/localhost-9001.sock"
        );
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn redis_without_feature_fails_at_setup() {
        let url = BrokerUrl::parse("redis://localhost").unwrap();
        let err = from_url(&url, Duration::from_secs(1)).err().unwrap();
        assert!(err.to_string().contains("'redis'"), "should mention feature gate: {err}");
    }

    #[cfg(not(feature = "amqp"))]
    #[test]
    fn amqp_without_feature_fails_at_setup() {
        let url = BrokerUrl::parse("amqp://localhost").unwrap();
        let err = from_url(&url, Duration::from_secs(1)).err().unwrap();
        assert!(err.to_string().contains("'amqp'"), "should mention feature gate: {err}");
    }
}
