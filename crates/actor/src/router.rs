use std::sync::atomic::{AtomicUsize, Ordering};

use tasq_core::{Job, TasqError, TasqFuture};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ActorError;
use crate::mailbox::ActorRef;

/// Message delivered to routed workers: the job, the future the worker must
/// complete once the job's result is known, and the channel on which it
/// reports whether the job was accepted.
#[derive(Debug)]
pub struct JobRequest {
    pub job: Job,
    pub reply: TasqFuture,
    pub ack: oneshot::Sender<Result<(), TasqError>>,
}

impl JobRequest {
    /// Report acceptance or rejection back to the router's caller. A caller
    /// that stopped listening is ignored.
    pub fn acknowledge(self, outcome: Result<(), TasqError>) {
        let _ = self.ack.send(outcome);
    }
}

/// A job handed to a worker: its result future plus the worker's
/// acceptance report.
#[derive(Debug)]
pub struct Routed {
    pub future: TasqFuture,
    pub accepted: oneshot::Receiver<Result<(), TasqError>>,
}

/// Picks the worker that receives each job.
pub trait Router: Send + Sync {
    /// Bind a router to a pool of running workers. An empty pool is rejected.
    fn from_pool(workers: Vec<ActorRef<JobRequest>>) -> Result<Self, ActorError>
    where
        Self: Sized;

    /// Short policy name for logs.
    fn policy(&self) -> &'static str;

    fn workers(&self) -> &[ActorRef<JobRequest>];

    /// Choose the worker for the next job.
    fn select(&self) -> &ActorRef<JobRequest>;

    /// Send `job` to the selected worker and return the future it will complete.
    fn route(&self, job: Job) -> Result<Routed, ActorError> {
        let reply = TasqFuture::new();
        let (ack, accepted) = oneshot::channel();
        let worker = self.select();
        debug!(
            policy = self.policy(),
            worker = %worker.name(),
            job = %job.name(),
            "routing job"
        );
        worker.send(JobRequest {
            job,
            reply: reply.clone(),
            ack,
        })?;
        Ok(Routed {
            future: reply,
            accepted,
        })
    }
}

/// Cycles through the pool in order, one worker per `route` call.
///
/// The cursor is the only shared state; it advances with a single atomic
/// update so concurrent callers never observe the same position.
#[derive(Debug)]
pub struct RoundRobinRouter {
    workers: Vec<ActorRef<JobRequest>>,
    cursor: AtomicUsize,
}

impl RoundRobinRouter {
    /// Position the next `select` will use.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

impl Router for RoundRobinRouter {
    fn from_pool(workers: Vec<ActorRef<JobRequest>>) -> Result<Self, ActorError> {
        if workers.is_empty() {
            return Err(ActorError::EmptyPool);
        }
        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    fn policy(&self) -> &'static str {
        "round-robin"
    }

    fn workers(&self) -> &[ActorRef<JobRequest>] {
        &self.workers
    }

    fn select(&self) -> &ActorRef<JobRequest> {
        let len = self.workers.len();
        let idx = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        &self.workers[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ActorCell;
    use crate::mailbox::{Actor, ActorExit, Mailbox};
    use async_trait::async_trait;

    struct Sink;

    #[async_trait]
    impl Actor for Sink {
        type Message = JobRequest;

        async fn run(&mut self, mailbox: &mut Mailbox<JobRequest>) -> Result<(), ActorExit> {
            loop {
                mailbox.recv().await?;
            }
        }
    }

    struct Refuser;

    #[async_trait]
    impl Actor for Refuser {
        type Message = JobRequest;

        async fn run(&mut self, mailbox: &mut Mailbox<JobRequest>) -> Result<(), ActorExit> {
            loop {
                let req = mailbox.recv().await?;
                let name = req.job.name().to_string();
                req.acknowledge(Err(TasqError::DuplicateName(name)));
            }
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = RoundRobinRouter::from_pool(Vec::new()).unwrap_err();
        assert_eq!(err, ActorError::EmptyPool);
    }

    #[tokio::test]
    async fn select_wraps_around() {
        let workers: Vec<_> = (0..3)
            .map(|i| ActorCell::new(format!("w{i}"), Sink).start())
            .collect();
        let router = RoundRobinRouter::from_pool(workers).unwrap();

        let picked: Vec<_> = (0..7).map(|_| router.select().name().to_string()).collect();
        assert_eq!(picked, vec!["w0", "w1", "w2", "w0", "w1", "w2", "w0"]);
        assert_eq!(router.cursor(), 1);
        assert_eq!(router.policy(), "round-robin");
    }

    #[tokio::test]
    async fn route_to_closed_worker_fails() {
        let worker = ActorCell::new("gone", Sink).start();
        worker.close();
        worker.join().await;
        let router = RoundRobinRouter::from_pool(vec![worker]).unwrap();
        let err = router.route(Job::builder("noop").build()).unwrap_err();
        assert!(matches!(err, ActorError::MailboxClosed(name) if name == "gone"));
    }

    #[tokio::test]
    async fn worker_rejection_reaches_the_caller() {
        let worker = ActorCell::new("picky", Refuser).start();
        let router = RoundRobinRouter::from_pool(vec![worker]).unwrap();

        let routed = router.route(Job::builder("f").name("twice").build()).unwrap();
        let outcome = routed.accepted.await.unwrap();
        assert!(matches!(outcome, Err(TasqError::DuplicateName(n)) if n == "twice"));
        assert!(!routed.future.is_done());
    }
}
