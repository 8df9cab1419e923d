//! Single-assignment result handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::job::JobResult;

/// Handle to the eventual [`JobResult`] of a scheduled job.
///
/// Completed at most once (normally by a client's gathering loop) and read by
/// any number of clones. Waiting with a timeout never consumes or cancels the
/// result: a later completion is still observed by every holder.
#[derive(Clone)]
pub struct TasqFuture {
    slot: Arc<watch::Sender<Option<JobResult>>>,
}

impl TasqFuture {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Store the result and wake all waiters.
    ///
    /// Returns `false` (and leaves the stored result untouched) if the future
    /// was already completed.
    pub fn set_result(&self, result: JobResult) -> bool {
        let mut incoming = Some(result);
        let stored = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = incoming.take();
            true
        });
        if let Some(rejected) = incoming {
            warn!(name = %rejected.name, "future already resolved, dropping duplicate result");
        }
        stored
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The result if it has already arrived, without waiting.
    pub fn try_result(&self) -> Option<JobResult> {
        self.slot.borrow().clone()
    }

    /// Wait for the result, up to `timeout` when one is given.
    ///
    /// Returns `None` if the timeout expires first.
    pub async fn result(&self, timeout: Option<Duration>) -> Option<JobResult> {
        let mut rx = self.slot.subscribe();
        let wait = async move {
            // The sender lives as long as `self`, so the channel cannot close here.
            let resolved = rx.wait_for(|slot| slot.is_some()).await.ok();
            resolved.and_then(|slot| slot.clone())
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }

    /// Wait for the result and unwrap it: the value on success, the remote
    /// error payload on failure. `None` on timeout.
    pub async fn value(&self, timeout: Option<Duration>) -> Option<Result<Value, String>> {
        self.result(timeout).await.map(JobResult::into_outcome)
    }

    /// Wait for the result and return the remote execution time.
    pub async fn exec_time(&self, timeout: Option<Duration>) -> Option<Duration> {
        self.result(timeout).await.map(|r| r.exec_time)
    }
}

impl Default for TasqFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TasqFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TasqFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
