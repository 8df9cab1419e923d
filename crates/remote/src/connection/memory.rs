use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tasq_core::{Job, JobResult, TasqError};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{BrokerConnection, Link, LinkStatus};

/// In-process broker for tests and local wiring.
///
/// Sent jobs are recorded; results are injected with [`MemoryBroker::deliver`]
/// and handed out by `recv` in delivery order. Injected errors surface as
/// transient [`TasqError::Transport`] failures.
pub struct MemoryBroker {
    name: String,
    link: Link,
    sent: Mutex<Vec<Job>>,
    inbox_tx: mpsc::UnboundedSender<Result<JobResult, String>>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Result<JobResult, String>>>,
    fail_connect: AtomicBool,
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            link: Link::new(),
            sent: Mutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    /// Jobs transmitted so far, oldest first.
    pub async fn sent_jobs(&self) -> Vec<Job> {
        self.sent.lock().await.clone()
    }

    /// Queue a result for the next `recv`.
    pub fn deliver(&self, result: JobResult) {
        let _ = self.inbox_tx.send(Ok(result));
    }

    /// Queue a transient receive failure.
    pub fn deliver_error(&self, message: impl Into<String>) {
        let _ = self.inbox_tx.send(Err(message.into()));
    }

    /// Make subsequent `connect` calls fail, simulating an unreachable broker.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_connect.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for MemoryBroker {
    async fn connect(&self) -> Result<(), TasqError> {
        if self.link.status() == LinkStatus::Closed {
            return Err(TasqError::Closed);
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TasqError::Transport(format!("{} is unreachable", self.name)));
        }
        self.link.set(LinkStatus::Up);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TasqError> {
        self.link.set(LinkStatus::Down);
        Ok(())
    }

    async fn close(&self) -> Result<(), TasqError> {
        self.link.set(LinkStatus::Closed);
        Ok(())
    }

    async fn send(&self, job: &Job) -> Result<(), TasqError> {
        self.link.ensure_up()?;
        debug!(broker = %self.name, job = %job.job_id(), "memory send");
        self.sent.lock().await.push(job.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<JobResult>, TasqError> {
        self.link.wait_up().await?;
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            next = inbox.recv() => match next {
                Some(Ok(result)) => Ok(Some(result)),
                Some(Err(message)) => Err(TasqError::Transport(message)),
                None => Err(TasqError::Closed),
            },
            _ = self.link.wait_down() => Ok(None),
        }
    }

    async fn pending_jobs(&self) -> Result<Option<Vec<Job>>, TasqError> {
        Ok(Some(self.sent.lock().await.clone()))
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }
}
