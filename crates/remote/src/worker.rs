use std::sync::Arc;

use async_trait::async_trait;
use tasq_actor::{Actor, ActorExit, JobRequest, Mailbox};
use tracing::{debug, warn};

use crate::client::TasqClient;

/// Pool member that forwards routed jobs to its own client.
///
/// The client is connected on the first job rather than at spawn time, so a
/// pool over unreachable brokers can still be built and jobs are buffered
/// until a later connect succeeds.
pub struct ClientWorker {
    client: Arc<TasqClient>,
}

impl ClientWorker {
    pub fn new(client: Arc<TasqClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<TasqClient> {
        &self.client
    }

    /// Forward one routed job and report the outcome on its `ack` channel.
    async fn handle(&self, request: JobRequest) {
        let JobRequest { job, reply, ack } = request;
        let label = self.client.label();
        if let Err(e) = self.client.connect().await {
            warn!(client = %label, error = %e, "lazy connect failed");
        }
        let job_id = job.job_id().to_string();
        let outcome = match self.client.submit(job, reply).await {
            Ok(Some(_)) => {
                debug!(client = %label, job = %job_id, "job forwarded");
                Ok(())
            }
            Ok(None) => {
                debug!(client = %label, job = %job_id, "job buffered");
                Ok(())
            }
            Err(e) => {
                warn!(client = %label, job = %job_id, error = %e, "job rejected");
                Err(e)
            }
        };
        let _ = ack.send(outcome);
    }
}

#[async_trait]
impl Actor for ClientWorker {
    type Message = JobRequest;

    async fn run(&mut self, mailbox: &mut Mailbox<JobRequest>) -> Result<(), ActorExit> {
        loop {
            let request = mailbox.recv().await?;
            self.handle(request).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tasq_actor::ActorCell;
    use tasq_core::{Job, JobResult, TasqError, TasqFuture};
    use tokio::sync::oneshot;

    use crate::connection::{BrokerConnection, MemoryBroker};

    #[tokio::test]
    async fn first_job_connects_the_client() {
        let broker = Arc::new(MemoryBroker::new("w"));
        let client = Arc::new(TasqClient::new(broker.clone()));
        let worker = ActorCell::new("w-0", ClientWorker::new(Arc::clone(&client))).start();

        let reply = TasqFuture::new();
        let (ack, accepted) = oneshot::channel();
        worker
            .send(JobRequest {
                job: Job::builder("sq").arg(3).name("nine").build(),
                reply: reply.clone(),
                ack,
            })
            .unwrap();
        assert!(accepted.await.unwrap().is_ok());

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.sent_jobs().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never reached the broker");
        assert!(client.is_connected().await);

        broker.deliver(JobResult::success("nine", 9, Duration::from_millis(1)));
        let res = reply.result(Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(res.value, Some(serde_json::json!(9)));

        worker.close();
        worker.join().await;
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_is_acknowledged_as_an_error() {
        let broker = Arc::new(MemoryBroker::new("w"));
        let client = Arc::new(TasqClient::new(broker.clone()));
        client.connect().await.unwrap();
        broker.disconnect().await.unwrap();
        let worker = ActorCell::new("w-0", ClientWorker::new(Arc::clone(&client))).start();

        let (ack, accepted) = oneshot::channel();
        worker
            .send(JobRequest {
                job: Job::builder("sq").arg(3).name("lost").build(),
                reply: TasqFuture::new(),
                ack,
            })
            .unwrap();
        let outcome = accepted.await.unwrap();
        assert!(matches!(outcome, Err(TasqError::SendFailed(_))));
        assert!(!client.results().await.contains_key("lost"));

        worker.close();
        worker.join().await;
        client.close().await.unwrap();
    }
}
