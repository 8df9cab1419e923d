use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ActorError;
use crate::mailbox::{Actor, ActorCell, ActorRef, ActorState};
use crate::router::{JobRequest, Router};

/// Type-erased view of a tracked actor, enough to shut it down.
#[async_trait]
trait Tracked: Send + Sync {
    fn name(&self) -> &str;
    fn state(&self) -> ActorState;
    fn close(&self);
    async fn join(&self);
}

#[async_trait]
impl<M: Send + 'static> Tracked for ActorRef<M> {
    fn name(&self) -> &str {
        ActorRef::name(self)
    }

    fn state(&self) -> ActorState {
        ActorRef::state(self)
    }

    fn close(&self) {
        ActorRef::close(self)
    }

    async fn join(&self) {
        ActorRef::join(self).await
    }
}

/// Named registry that creates, starts and tracks actors, and shuts them all
/// down together.
pub struct ActorSystem {
    name: String,
    actors: Mutex<Vec<Arc<dyn Tracked>>>,
}

impl ActorSystem {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(system = %name, "actor system created");
        Self {
            name,
            actors: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tracked actors.
    pub fn len(&self) -> usize {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create, start and track one actor. Must be called inside a tokio runtime.
    pub fn spawn<A: Actor>(&self, name: impl Into<String>, actor: A) -> ActorRef<A::Message> {
        let actor_ref = ActorCell::new(name, actor).start();
        debug!(system = %self.name, actor = %actor_ref.name(), "actor started");
        self.actors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(actor_ref.clone()));
        actor_ref
    }

    /// Build a pool of `num_workers` actors and bind a router of policy `R` to it.
    ///
    /// `factory(i)` builds the i-th worker, so each worker can receive its own
    /// constructor arguments (e.g. one client per worker).
    pub fn router_of<A, R, F>(&self, num_workers: usize, mut factory: F) -> Result<R, ActorError>
    where
        A: Actor<Message = JobRequest>,
        R: Router,
        F: FnMut(usize) -> A,
    {
        if num_workers == 0 {
            return Err(ActorError::InvalidPoolSize(num_workers));
        }
        let workers = (0..num_workers)
            .map(|i| self.spawn(format!("{}-worker-{}", self.name, i), factory(i)))
            .collect();
        let router = R::from_pool(workers)?;
        info!(
            system = %self.name,
            workers = num_workers,
            policy = router.policy(),
            "worker pool ready"
        );
        Ok(router)
    }

    /// Send the exit sentinel to every tracked actor and wait for all of them.
    ///
    /// Actors that already terminated are joined immediately. Calling this
    /// twice is harmless: the registry is emptied by the first call.
    pub async fn shutdown(&self) {
        let actors = std::mem::take(
            &mut *self.actors.lock().unwrap_or_else(PoisonError::into_inner),
        );
        info!(system = %self.name, actors = actors.len(), "shutting down actor system");
        for actor in &actors {
            actor.close();
        }
        for actor in &actors {
            actor.join().await;
            debug!(actor = %actor.name(), state = ?actor.state(), "actor joined");
        }
        info!(system = %self.name, "actor system stopped");
    }
}
