//! Spread jobs over several remote supervisors, one client per endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tasq_actor::{ActorError, ActorSystem, RoundRobinRouter, Router};
use tasq_core::{Job, JobResult, TasqError, TasqFuture};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::TasqClient;
use crate::config::PoolConfig;
use crate::worker::ClientWorker;

pub const POOL_SYSTEM_NAME: &str = "clientpool-actorsystem";

fn pool_err(e: ActorError) -> TasqError {
    TasqError::Pool(e.to_string())
}

/// Client pool. Each client is wrapped in a [`ClientWorker`] actor and jobs
/// are dispatched through router `R`.
pub struct TasqClientPool<R: Router = RoundRobinRouter> {
    clients: Vec<Arc<TasqClient>>,
    system: ActorSystem,
    router: R,
    results: Mutex<HashMap<String, TasqFuture>>,
}

impl<R: Router> TasqClientPool<R> {
    /// Wrap each client in a worker actor and bind the router.
    ///
    /// Worker actors are spawned onto the current tokio runtime, so this must
    /// be called from within one.
    pub fn new(clients: Vec<TasqClient>) -> Result<Self, TasqError> {
        if clients.is_empty() {
            return Err(TasqError::Pool("a pool needs at least one client".into()));
        }
        let clients: Vec<Arc<TasqClient>> = clients.into_iter().map(Arc::new).collect();
        let system = ActorSystem::new(POOL_SYSTEM_NAME);
        let router: R = system
            .router_of(clients.len(), |i| ClientWorker::new(Arc::clone(&clients[i])))
            .map_err(pool_err)?;
        info!(
            clients = clients.len(),
            policy = router.policy(),
            "client pool ready"
        );
        Ok(Self {
            clients,
            system,
            router,
            results: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_urls<I, S>(urls: I) -> Result<Self, TasqError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let clients = urls
            .into_iter()
            .map(|url| TasqClient::from_url(url.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(clients)
    }

    pub fn from_config(config: &PoolConfig) -> Result<Self, TasqError> {
        let clients = config
            .client_configs()
            .iter()
            .map(TasqClient::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(clients)
    }

    pub fn clients(&self) -> &[Arc<TasqClient>] {
        &self.clients
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// Every future handed out by [`TasqClientPool::schedule`], by job id.
    pub async fn results(&self) -> HashMap<String, TasqFuture> {
        self.results.lock().await.clone()
    }

    /// Route a job to the next worker and wait for it to accept the job.
    ///
    /// Errors raised by the worker's client, such as a duplicate name or a
    /// failed send, are returned as-is.
    pub async fn schedule(&self, job: Job) -> Result<TasqFuture, TasqError> {
        let job_id = job.job_id().to_string();
        let routed = self.router.route(job).map_err(pool_err)?;
        routed
            .accepted
            .await
            .map_err(|_| TasqError::Pool(format!("worker dropped job {job_id}")))??;
        self.results.lock().await.insert(job_id, routed.future.clone());
        Ok(routed.future)
    }

    pub async fn schedule_blocking(
        &self,
        job: Job,
        timeout: Duration,
    ) -> Result<JobResult, TasqError> {
        let future = self.schedule(job).await?;
        future
            .result(Some(timeout))
            .await
            .ok_or(TasqError::Timeout(timeout))
    }

    /// Schedule `func` once per argument set, straight onto the clients in
    /// turn (`i % n`). Entries are `None` for jobs that were buffered because
    /// their client could not connect.
    pub async fn map<I>(&self, func: &str, calls: I) -> Result<Vec<Option<TasqFuture>>, TasqError>
    where
        I: IntoIterator<Item = (Vec<Value>, BTreeMap<String, Value>)>,
    {
        let mut futures = Vec::new();
        for (i, (args, kwargs)) in calls.into_iter().enumerate() {
            let client = &self.clients[i % self.clients.len()];
            if !client.is_connected().await {
                if let Err(e) = client.connect().await {
                    warn!(client = %client.label(), error = %e, "lazy connect failed");
                }
            }
            let job = Job::builder(func).args(args).kwargs(kwargs).build();
            futures.push(client.schedule(job).await?);
        }
        Ok(futures)
    }

    /// Close every client, then stop the worker actors.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            if let Err(e) = client.close().await {
                warn!(client = %client.label(), error = %e, "error closing client");
            }
        }
        self.system.shutdown().await;
        info!("client pool shut down");
    }
}
