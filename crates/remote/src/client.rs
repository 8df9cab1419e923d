//! Job-scheduling client bound to one broker connection.
//!
//! Jobs scheduled while disconnected are buffered and replayed in order on
//! the next `connect`. A background gathering loop, started on the first
//! connect, matches incoming results to their futures by job name.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tasq_core::config::DEFAULT_RECV_BACKOFF_MS;
use tasq_core::{ClientConfig, Job, JobResult, TasqError, TasqFuture};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::broker_url::BrokerUrl;
use crate::connection::{self, BrokerConnection};

type ResultMap = Arc<Mutex<HashMap<String, TasqFuture>>>;

struct ClientState {
    connected: bool,
    pending: VecDeque<Job>,
    gatherer: Option<JoinHandle<()>>,
}

pub struct TasqClient {
    label: String,
    connection: Arc<dyn BrokerConnection>,
    state: Mutex<ClientState>,
    results: ResultMap,
    recv_backoff: Duration,
}

impl TasqClient {
    pub fn new(connection: Arc<dyn BrokerConnection>) -> Self {
        Self {
            label: connection.describe(),
            connection,
            state: Mutex::new(ClientState {
                connected: false,
                pending: VecDeque::new(),
                gatherer: None,
            }),
            results: Arc::new(Mutex::new(HashMap::new())),
            recv_backoff: Duration::from_millis(DEFAULT_RECV_BACKOFF_MS),
        }
    }

    /// Pause applied by the gathering loop after a transient receive error.
    pub fn with_recv_backoff(mut self, backoff: Duration) -> Self {
        self.recv_backoff = backoff;
        self
    }

    /// Client for a connection string, with default timeouts.
    pub fn from_url(url: &str) -> Result<Self, TasqError> {
        Self::from_config(&ClientConfig {
            url: url.to_string(),
            ..ClientConfig::default()
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TasqError> {
        let url = BrokerUrl::parse(&config.url)?;
        let connection = connection::from_url(&url, config.connect_timeout())?;
        Ok(Self::new(connection).with_recv_backoff(config.recv_backoff()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Open the broker link and flush jobs buffered while disconnected.
    ///
    /// Replayed jobs get fresh futures, reachable by name through
    /// [`TasqClient::results`]. If a replayed send fails the job goes back
    /// to the head of the buffer and the error is returned.
    #[instrument(skip_all, fields(client = %self.label))]
    pub async fn connect(&self) -> Result<(), TasqError> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }
        self.connection.connect().await?;
        state.connected = true;
        info!(buffered = state.pending.len(), "client connected");

        if state.gatherer.is_none() {
            state.gatherer = Some(tokio::spawn(gather(
                self.label.clone(),
                Arc::clone(&self.connection),
                Arc::clone(&self.results),
                self.recv_backoff,
            )));
        }

        while let Some(job) = state.pending.pop_front() {
            match self.dispatch(&job, TasqFuture::new()).await {
                Ok(_) => debug!(job = %job.job_id(), "replayed buffered job"),
                Err(TasqError::DuplicateName(name)) => {
                    warn!(job = %name, "dropping buffered job with a name already in flight");
                }
                Err(e) => {
                    state.pending.push_front(job);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), TasqError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Ok(());
        }
        self.connection.disconnect().await?;
        state.connected = false;
        info!(client = %self.label, "client disconnected");
        Ok(())
    }

    /// Release the connection for good and wait for the gathering loop to
    /// stop. Unresolved futures stay unresolved.
    pub async fn close(&self) -> Result<(), TasqError> {
        let mut state = self.state.lock().await;
        if state.connected {
            self.connection.disconnect().await?;
            state.connected = false;
        }
        self.connection.close().await?;
        if let Some(gatherer) = state.gatherer.take() {
            if let Err(e) = gatherer.await {
                warn!(client = %self.label, error = %e, "gathering loop ended abnormally");
            }
        }
        info!(client = %self.label, "client closed");
        Ok(())
    }

    /// Submit a job. Returns `Ok(None)` when the job was buffered because the
    /// client is disconnected.
    pub async fn schedule(&self, job: Job) -> Result<Option<TasqFuture>, TasqError> {
        self.submit(job, TasqFuture::new()).await
    }

    /// Submit a job whose result lands in `reply`.
    pub(crate) async fn submit(
        &self,
        job: Job,
        reply: TasqFuture,
    ) -> Result<Option<TasqFuture>, TasqError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            debug!(client = %self.label, job = %job.job_id(), "not connected, buffering job");
            state.pending.push_back(job);
            return Ok(None);
        }
        self.dispatch(&job, reply).await.map(Some)
    }

    /// Submit and wait for the result. Never buffers.
    pub async fn schedule_blocking(
        &self,
        job: Job,
        timeout: Duration,
    ) -> Result<JobResult, TasqError> {
        let future = {
            let state = self.state.lock().await;
            if !state.connected {
                return Err(TasqError::NotConnected);
            }
            self.dispatch(&job, TasqFuture::new()).await?
        };
        future
            .result(Some(timeout))
            .await
            .ok_or(TasqError::Timeout(timeout))
    }

    /// Register `reply` under the job name, then transmit.
    async fn dispatch(&self, job: &Job, reply: TasqFuture) -> Result<TasqFuture, TasqError> {
        {
            let mut results = self.results.lock().await;
            if results.contains_key(job.name()) {
                return Err(TasqError::DuplicateName(job.name().to_string()));
            }
            results.insert(job.name().to_string(), reply.clone());
        }
        if let Err(e) = self.connection.send(job).await {
            self.results.lock().await.remove(job.name());
            warn!(client = %self.label, job = %job.job_id(), error = %e, "send failed");
            return Err(match e {
                TasqError::SendFailed(_) => e,
                other => TasqError::SendFailed(other.to_string()),
            });
        }
        debug!(client = %self.label, job = %job, "job sent");
        Ok(reply)
    }

    /// Jobs buffered locally while disconnected, oldest first.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Jobs still queued on the broker, where the transport can list them.
    pub async fn broker_pending_jobs(&self) -> Result<Option<Vec<Job>>, TasqError> {
        self.connection.pending_jobs().await
    }

    /// Names of scheduled jobs whose result has not arrived yet.
    pub async fn pending_results(&self) -> Vec<String> {
        let results = self.results.lock().await;
        let mut names: Vec<String> = results
            .iter()
            .filter(|(_, fut)| !fut.is_done())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of every future this client has handed out, by job name.
    pub async fn results(&self) -> HashMap<String, TasqFuture> {
        self.results.lock().await.clone()
    }

    /// Wait until every scheduled job has a result, then close.
    pub async fn drain(&self, poll: Duration) -> Result<(), TasqError> {
        loop {
            let waiting = self.pending_results().await;
            if waiting.is_empty() {
                break;
            }
            debug!(client = %self.label, waiting = waiting.len(), "draining");
            tokio::time::sleep(poll).await;
        }
        self.close().await
    }
}

impl Drop for TasqClient {
    fn drop(&mut self) {
        if let Some(gatherer) = self.state.get_mut().gatherer.take() {
            gatherer.abort();
        }
    }
}

/// Receive results until the connection is closed for good.
async fn gather(
    label: String,
    connection: Arc<dyn BrokerConnection>,
    results: ResultMap,
    backoff: Duration,
) {
    debug!(client = %label, "result gatherer started");
    loop {
        match connection.recv().await {
            Ok(Some(result)) => complete(&label, &results, result).await,
            Ok(None) => continue,
            Err(e) if e.is_permanent() => {
                debug!(client = %label, "result gatherer stopping");
                break;
            }
            Err(e) => {
                warn!(client = %label, error = %e, "receive failed, backing off");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn complete(label: &str, results: &ResultMap, result: JobResult) {
    let future = results.lock().await.get(&result.name).cloned();
    match future {
        Some(future) => {
            debug!(
                client = %label,
                job = %result.name,
                status = %result.outcome,
                exec_ms = result.exec_time.as_millis() as u64,
                "result received"
            );
            future.set_result(result);
        }
        None => {
            let err = TasqError::UnknownCorrelationKey(result.name);
            error!(client = %label, error = %err, "dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryBroker;

    #[tokio::test]
    async fn unknown_scheme_fails_at_setup() {
        assert!(matches!(
            TasqClient::from_url("http://example.com"),
            Err(TasqError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn label_comes_from_the_connection() {
        let client = TasqClient::new(Arc::new(MemoryBroker::new("lbl")));
        assert_eq!(client.label(), "memory://lbl");
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn failed_connect_keeps_the_buffer() {
        let broker = Arc::new(MemoryBroker::new("down"));
        broker.set_unreachable(true);
        let client = TasqClient::new(broker.clone());
        client.schedule(Job::builder("f").name("x").build()).await.unwrap();

        assert!(client.connect().await.is_err());
        assert!(!client.is_connected().await);
        assert_eq!(client.pending_jobs().await.len(), 1);

        broker.set_unreachable(false);
        client.connect().await.unwrap();
        assert!(client.pending_jobs().await.is_empty());
        assert_eq!(client.pending_results().await, vec!["x".to_string()]);
    }
}
