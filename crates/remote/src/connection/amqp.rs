//! Message-queue broker over AMQP 0-9-1. Jobs are published to the queue
//! named in the connection string; results are fetched from
//! `{queue}:results`.
//!
//! Requires the `amqp` cargo feature.

#[cfg(feature = "amqp")]
pub use enabled::AmqpConnection;

#[cfg(not(feature = "amqp"))]
pub use disabled::AmqpConnection;

/// Pause between empty `basic.get` polls.
pub const EMPTY_POLL_DELAY_MS: u64 = 100;

pub fn results_queue(queue: &str) -> String {
    format!("{queue}:results")
}

#[cfg(feature = "amqp")]
mod enabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use lapin::options::{BasicGetOptions, BasicPublishOptions, QueueDeclareOptions};
    use lapin::types::FieldTable;
    use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
    use tasq_core::{Job, JobResult, TasqError};
    use tokio::sync::Mutex;
    use tracing::{info, instrument, warn};

    use super::{results_queue, EMPTY_POLL_DELAY_MS};
    use crate::connection::{BrokerConnection, Link, LinkStatus};
    use crate::message::{decode_result, encode_job};

    fn amqp_err(e: lapin::Error) -> TasqError {
        TasqError::Transport(e.to_string())
    }

    struct Session {
        connection: Connection,
        channel: Channel,
    }

    pub struct AmqpConnection {
        uri: String,
        queue: String,
        session: Mutex<Option<Session>>,
        link: Link,
        connect_timeout: Duration,
    }

    impl AmqpConnection {
        pub fn new(
            host: &str,
            port: u16,
            queue: &str,
            connect_timeout: Duration,
        ) -> Result<Self, TasqError> {
            Ok(Self {
                uri: format!("amqp://{host}:{port}/%2f"),
                queue: queue.to_string(),
                session: Mutex::new(None),
                link: Link::new(),
                connect_timeout,
            })
        }

        async fn open(&self) -> Result<Session, TasqError> {
            let connection = Connection::connect(&self.uri, ConnectionProperties::default())
                .await
                .map_err(amqp_err)?;
            let channel = connection.create_channel().await.map_err(amqp_err)?;
            for name in [self.queue.clone(), results_queue(&self.queue)] {
                channel
                    .queue_declare(&name, QueueDeclareOptions::default(), FieldTable::default())
                    .await
                    .map_err(amqp_err)?;
            }
            Ok(Session {
                connection,
                channel,
            })
        }

        async fn shutdown_session(&self) {
            let session = self.session.lock().await.take();
            if let Some(session) = session {
                if let Err(e) = session.connection.close(200, "bye").await {
                    warn!(error = %e, "error closing AMQP connection");
                }
            }
        }
    }

    #[async_trait]
    impl BrokerConnection for AmqpConnection {
        #[instrument(skip_all, fields(queue = %self.queue))]
        async fn connect(&self) -> Result<(), TasqError> {
            match self.link.status() {
                LinkStatus::Up => return Ok(()),
                LinkStatus::Closed => return Err(TasqError::Closed),
                LinkStatus::Down => {}
            }
            let session = tokio::time::timeout(self.connect_timeout, self.open())
                .await
                .map_err(|_| TasqError::Timeout(self.connect_timeout))??;
            *self.session.lock().await = Some(session);
            info!(uri = %self.uri, "connected to AMQP broker");
            self.link.set(LinkStatus::Up);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TasqError> {
            self.link.set(LinkStatus::Down);
            self.shutdown_session().await;
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
            let channel = match self.session.lock().await.as_ref() {
                Some(session) => session.channel.clone(),
                None => return Err(TasqError::SendFailed("AMQP channel is not open".into())),
            };
            let send_failed = |e: lapin::Error| TasqError::SendFailed(e.to_string());
            channel
                .basic_publish(
                    "",
                    &self.queue,
                    BasicPublishOptions::default(),
                    &bytes,
                    BasicProperties::default(),
                )
                .await
                .map_err(send_failed)?
                .await
                .map_err(send_failed)?;
            Ok(())
        }

        async fn recv(&self) -> Result<Option<JobResult>, TasqError> {
            self.link.wait_up().await?;
            let Some(channel) = self
                .session
                .lock()
                .await
                .as_ref()
                .map(|s| s.channel.clone())
            else {
                return Ok(None);
            };
            let options = BasicGetOptions { no_ack: true };
            let fetched = tokio::select! {
                fetched = channel.basic_get(&results_queue(&self.queue), options) => {
                    fetched.map_err(amqp_err)?
                }
                _ = self.link.wait_down() => return Ok(None),
            };
            match fetched {
                Some(message) => decode_result(&message.delivery.data).map(Some),
                None => {
                    tokio::time::sleep(Duration::from_millis(EMPTY_POLL_DELAY_MS)).await;
                    Ok(None)
                }
            }
        }

        fn describe(&self) -> String {
            format!("{}?name={}", self.uri, self.queue)
        }
    }
}

#[cfg(not(feature = "amqp"))]
mod disabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use tasq_core::{Job, JobResult, TasqError};

    use crate::connection::BrokerConnection;

    const MISSING: &str = "amqp transport requires the 'amqp' cargo feature";

    /// Placeholder for builds without the `amqp` feature.
    #[derive(Debug)]
    pub struct AmqpConnection;

    impl AmqpConnection {
        pub fn new(
            _host: &str,
            _port: u16,
            _queue: &str,
            _connect_timeout: Duration,
        ) -> Result<Self, TasqError> {
            Err(TasqError::Unsupported(MISSING.into()))
        }
    }

    #[async_trait]
    impl BrokerConnection for AmqpConnection {
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
            "amqp (disabled)".into()
        }
    }
}
