//! Key-store broker: jobs are pushed onto a list named after the queue and
//! results are popped from `{queue}:results`.
//!
//! The real adapter needs the `redis` cargo feature. Without it, building a
//! connection fails with [`TasqError::Unsupported`].

#[cfg(feature = "redis")]
pub use enabled::RedisConnection;

#[cfg(not(feature = "redis"))]
pub use disabled::RedisConnection;

/// Seconds a single BLPOP waits before `recv` reports no data.
pub const POLL_TIMEOUT_SECS: f64 = 1.0;

pub fn results_key(queue: &str) -> String {
    format!("{queue}:results")
}

#[cfg(feature = "redis")]
mod enabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use tasq_core::{Job, JobResult, TasqError};
    use tokio::sync::Mutex;
    use tracing::{debug, info, instrument};

    use super::{results_key, POLL_TIMEOUT_SECS};
    use crate::connection::{BrokerConnection, Link, LinkStatus};
    use crate::message::{decode_job, decode_result, encode_job};

    fn redis_err(e: redis::RedisError) -> TasqError {
        TasqError::Transport(e.to_string())
    }

    /// Two multiplexed connections: one for pushes and listing, one for the
    /// blocking pop, so a waiting BLPOP never stalls a send.
    pub struct RedisConnection {
        client: redis::Client,
        endpoint: String,
        queue: String,
        push: Mutex<Option<MultiplexedConnection>>,
        pull: Mutex<Option<MultiplexedConnection>>,
        link: Link,
        connect_timeout: Duration,
    }

    impl RedisConnection {
        pub fn new(
            host: &str,
            port: u16,
            db: i64,
            queue: &str,
            connect_timeout: Duration,
        ) -> Result<Self, TasqError> {
            let endpoint = format!("redis://{host}:{port}/{db}");
            let client = redis::Client::open(endpoint.as_str()).map_err(redis_err)?;
            Ok(Self {
                client,
                endpoint,
                queue: queue.to_string(),
                push: Mutex::new(None),
                pull: Mutex::new(None),
                link: Link::new(),
                connect_timeout,
            })
        }

        async fn open(&self) -> Result<MultiplexedConnection, TasqError> {
            tokio::time::timeout(
                self.connect_timeout,
                self.client.get_multiplexed_async_connection(),
            )
            .await
            .map_err(|_| TasqError::Timeout(self.connect_timeout))?
            .map_err(redis_err)
        }

        async fn push_conn(&self) -> Result<MultiplexedConnection, TasqError> {
            self.push
                .lock()
                .await
                .clone()
                .ok_or_else(|| TasqError::SendFailed("redis link is down".into()))
        }
    }

    #[async_trait]
    impl BrokerConnection for RedisConnection {
        #[instrument(skip_all, fields(endpoint = %self.endpoint, queue = %self.queue))]
        async fn connect(&self) -> Result<(), TasqError> {
            match self.link.status() {
                LinkStatus::Up => return Ok(()),
                LinkStatus::Closed => return Err(TasqError::Closed),
                LinkStatus::Down => {}
            }
            let push = self.open().await?;
            let pull = self.open().await?;
            *self.push.lock().await = Some(push);
            *self.pull.lock().await = Some(pull);
            info!("connected to redis");
            self.link.set(LinkStatus::Up);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TasqError> {
            self.link.set(LinkStatus::Down);
            self.push.lock().await.take();
            self.pull.lock().await.take();
            Ok(())
        }

        async fn close(&self) -> Result<(), TasqError> {
            self.disconnect().await?;
            self.link.set(LinkStatus::Closed);
            Ok(())
        }

        async fn send(&self, job: &Job) -> Result<(), TasqError> {
            self.link.ensure_up()?;
            let bytes = encode_job(job)?;
            let mut conn = self.push_conn().await?;
            let depth: i64 = conn
                .rpush(&self.queue, bytes)
                .await
                .map_err(|e| TasqError::SendFailed(e.to_string()))?;
            debug!(queue = %self.queue, depth, "job pushed");
            Ok(())
        }

        async fn recv(&self) -> Result<Option<JobResult>, TasqError> {
            self.link.wait_up().await?;
            let Some(mut conn) = self.pull.lock().await.clone() else {
                return Ok(None);
            };
            let key = results_key(&self.queue);
            let pop: redis::RedisFuture<'_, Option<(String, Vec<u8>)>> =
                conn.blpop(&key, POLL_TIMEOUT_SECS);
            let popped = tokio::select! {
                popped = pop => popped.map_err(redis_err)?,
                _ = self.link.wait_down() => return Ok(None),
            };
            match popped {
                Some((_, bytes)) => decode_result(&bytes).map(Some),
                None => Ok(None),
            }
        }

        async fn pending_jobs(&self) -> Result<Option<Vec<Job>>, TasqError> {
            self.link.ensure_up().map_err(|_| TasqError::NotConnected)?;
            let mut conn = self.push_conn().await?;
            let raw: Vec<Vec<u8>> = conn.lrange(&self.queue, 0, -1).await.map_err(redis_err)?;
            raw.iter()
                .map(|bytes| decode_job(bytes))
                .collect::<Result<Vec<_>, _>>()
                .map(Some)
        }

        fn describe(&self) -> String {
            format!("{}?name={}", self.endpoint, self.queue)
        }
    }
}

#[cfg(not(feature = "redis"))]
mod disabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use tasq_core::{Job, JobResult, TasqError};

    use crate::connection::BrokerConnection;

    const MISSING: &str = "redis transport requires the 'redis' cargo feature";

    /// Placeholder for builds without the `redis` feature.
    #[derive(Debug)]
    pub struct RedisConnection;

    impl RedisConnection {
        pub fn new(
            _host: &str,
            _port: u16,
            _db: i64,
            _queue: &str,
            _connect_timeout: Duration,
        ) -> Result<Self, TasqError> {
            Err(TasqError::Unsupported(MISSING.into()))
        }
    }

    #[async_trait]
    impl BrokerConnection for RedisConnection {
        async fn connect(&self) -> Result<(), TasqError> {
            Err(TasqError::Unsupported(MISSING.into()))
        }

        async fn disconnect(&self) -> Result<(), TasqError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TasqError> {
            Ok(())
        }

        async fn send(&self, _job: &Job) -> Result<(), TasqError> {
            Err(TasqError::Unsupported(MISSING.into()))
        }

        async fn recv(&self) -> Result<Option<JobResult>, TasqError> {
            Err(TasqError::Closed)
        }

        fn describe(&self) -> String {
            "redis (disabled)".into()
        }
    }
}
