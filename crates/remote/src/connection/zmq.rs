use std::time::Duration;

use async_trait::async_trait;
use tasq_core::{Job, JobResult, TasqError};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend, ZmqError};

use super::{BrokerConnection, Link, LinkStatus};
use crate::message::{decode_result, encode_job};
use crate::transport::Transport;

/// PUSH/PULL socket pair towards a remote supervisor.
///
/// Jobs leave through a PUSH socket connected to `port`; results arrive on a
/// PULL socket connected to `plport`. With `unix://` the pull side uses an
/// IPC socket named after host and pull port instead of TCP.
pub struct ZmqConnection {
    push_transport: Transport,
    pull_transport: Transport,
    push: Mutex<Option<PushSocket>>,
    pull: Mutex<Option<PullSocket>>,
    link: Link,
    connect_timeout: Duration,
}

fn transport_err(e: ZmqError) -> TasqError {
    TasqError::Transport(e.to_string())
}

impl ZmqConnection {
    pub fn new(
        host: &str,
        port: u16,
        plport: u16,
        unix_socket: bool,
        connect_timeout: Duration,
    ) -> Self {
        let transport = |port| {
            if unix_socket {
                Transport::ipc_for(host, port)
            } else {
                Transport::tcp(host, port)
            }
        };
        Self {
            push_transport: transport(port),
            pull_transport: transport(plport),
            push: Mutex::new(None),
            pull: Mutex::new(None),
            link: Link::new(),
            connect_timeout,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    async fn open_push(&self) -> Result<PushSocket, TasqError> {
        let mut socket = PushSocket::new();
        let endpoint = self.push_transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUSH socket");
        tokio::time::timeout(self.connect_timeout, socket.connect(&endpoint))
            .await
            .map_err(|_| TasqError::Timeout(self.connect_timeout))?
            .map_err(transport_err)?;
        Ok(socket)
    }

    async fn open_pull(&self) -> Result<PullSocket, TasqError> {
        let mut socket = PullSocket::new();
        let endpoint = self.pull_transport.endpoint();
        info!(endpoint = %endpoint, "connecting PULL socket");
        tokio::time::timeout(self.connect_timeout, socket.connect(&endpoint))
            .await
            .map_err(|_| TasqError::Timeout(self.connect_timeout))?
            .map_err(transport_err)?;
        Ok(socket)
    }

    /// Take both sockets out and close them. Errors are only logged.
    async fn drop_sockets(&self) {
        let push = self.push.lock().await.take();
        if let Some(socket) = push {
            for e in socket.close().await {
                warn!(error = %e, "error closing PUSH socket");
            }
        }
        let pull = self.pull.lock().await.take();
        if let Some(socket) = pull {
            for e in socket.close().await {
                warn!(error = %e, "error closing PULL socket");
            }
        }
    }
}

#[async_trait]
impl BrokerConnection for ZmqConnection {
    #[instrument(skip_all, fields(endpoint = %self.push_transport))]
    async fn connect(&self) -> Result<(), TasqError> {
        match self.link.status() {
            LinkStatus::Up => return Ok(()),
            LinkStatus::Closed => return Err(TasqError::Closed),
            LinkStatus::Down => {}
        }
        let mut push = self.push.lock().await;
        if push.is_none() {
            *push = Some(self.open_push().await?);
        }
        {
            let mut pull = self.pull.lock().await;
            if pull.is_none() {
                *pull = Some(self.open_pull().await?);
            }
        }
        drop(push);
        self.link.set(LinkStatus::Up);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TasqError> {
        if self.link.set(LinkStatus::Down) == LinkStatus::Up {
            debug!(endpoint = %self.push_transport, "disconnecting");
        }
        self.drop_sockets().await;
        Ok(())
    }

    async fn close(&self) -> Result<(), TasqError> {
        self.link.set(LinkStatus::Down);
        self.drop_sockets().await;
        self.link.set(LinkStatus::Closed);
        Ok(())
    }

    async fn send(&self, job: &Job) -> Result<(), TasqError> {
        self.link.ensure_up()?;
        let bytes = encode_job(job)?;
        let mut guard = self.push.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| TasqError::SendFailed("PUSH socket is not open".into()))?;
        socket
            .send(bytes.into())
            .await
            .map_err(|e| TasqError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<JobResult>, TasqError> {
        self.link.wait_up().await?;
        let mut guard = self.pull.lock().await;
        let Some(socket) = guard.as_mut() else {
            return Ok(None);
        };
        let raw = tokio::select! {
            raw = socket.recv() => raw.map_err(transport_err)?,
            _ = self.link.wait_down() => return Ok(None),
        };
        let frame = raw
            .get(0)
            .ok_or_else(|| TasqError::Transport("empty ZMQ frame".into()))?;
        decode_result(frame.as_ref()).map(Some)
    }

    fn describe(&self) -> String {
        format!("zmq push={} pull={}", self.push_transport, self.pull_transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_scheme_uses_ipc_on_both_sides() {
        let conn = ZmqConnection::new("localhost", 9000, 9001, true, Duration::from_secs(1));
        assert_eq!(conn.push_transport.endpoint(), "ipc:///tmp/tasq/localhost-9000.sock");
        assert_eq!(conn.pull_transport.endpoint(), "ipc:///tmp/tasq/localhost-9001.sock");
    }

    #[test]
    fn tcp_scheme_uses_tcp_on_both_sides() {
        let conn = ZmqConnection::new("10.0.0.4", 9000, 9001, false, Duration::from_secs(1));
        assert_eq!(
            conn.describe(),
            "zmq push=tcp://10.0.0.4:9000 pull=tcp://10.0.0.4:9001"
        );
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let conn = ZmqConnection::new("127.0.0.1", 17050, 17051, false, Duration::from_secs(1));
        let err = conn.send(&Job::builder("noop").build()).await.unwrap_err();
        assert!(matches!(err, TasqError::SendFailed(_)));
    }

    #[tokio::test]
    async fn closed_connection_refuses_connect() {
        let conn = ZmqConnection::new("127.0.0.1", 17052, 17053, false, Duration::from_secs(1));
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(conn.connect().await, Err(TasqError::Closed)));
        assert!(matches!(conn.recv().await, Err(TasqError::Closed)));
        assert_eq!(conn.status(), LinkStatus::Closed);
    }
}
