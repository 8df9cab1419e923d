//! Mailbox actors.
//!
//! An actor owns an unbounded FIFO inbox and runs its [`Actor::run`] behavior
//! on a dedicated tokio task. Other code talks to it only through an
//! [`ActorRef`]: `send` enqueues, `close` enqueues the exit sentinel and
//! `join` waits for the run loop to finish.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::ActorError;

/// Returned by [`Mailbox::recv`] once the exit sentinel is dequeued, so
/// `run` implementations can unwind with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorExit;

/// Lifecycle of an actor. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Created,
    Running,
    Terminated,
}

enum Envelope<M> {
    Message(M),
    Exit,
}

/// Message-processing behavior of an actor.
#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// Process messages until the mailbox yields [`ActorExit`].
    ///
    /// Typical implementations loop on `mailbox.recv().await?`.
    async fn run(&mut self, mailbox: &mut Mailbox<Self::Message>) -> Result<(), ActorExit>;
}

/// Receiving side of an actor's inbox. Only the actor's own task holds it.
pub struct Mailbox<M> {
    rx: mpsc::UnboundedReceiver<Envelope<M>>,
}

impl<M> Mailbox<M> {
    /// Wait for the next message.
    ///
    /// The exit sentinel, or every sender being dropped, yields `Err(ActorExit)`.
    pub async fn recv(&mut self) -> Result<M, ActorExit> {
        match self.rx.recv().await {
            Some(Envelope::Message(msg)) => Ok(msg),
            Some(Envelope::Exit) | None => Err(ActorExit),
        }
    }
}

/// Cloneable handle used to talk to an actor.
pub struct ActorRef<M> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Envelope<M>>,
    state: watch::Receiver<ActorState>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<M> ActorRef<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActorState {
        *self.state.borrow()
    }

    /// Enqueue a message. Never waits; per-sender order is preserved.
    pub fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(Envelope::Message(msg))
            .map_err(|_| ActorError::MailboxClosed(self.name.to_string()))
    }

    /// Ask the actor to stop once it reaches the sentinel. Safe to call repeatedly.
    pub fn close(&self) {
        if self.tx.send(Envelope::Exit).is_err() {
            debug!(actor = %self.name, "close on an already terminated actor");
        }
    }

    /// Wait until the run loop has exited.
    ///
    /// Returns immediately for terminated actors, and also when the actor was
    /// dropped without ever being started.
    pub async fn join(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ActorState::Terminated).await;
    }
}

/// An actor that has been created but not started yet.
///
/// [`ActorCell::start`] consumes the cell, so an actor can only be started once.
pub struct ActorCell<A: Actor> {
    actor_ref: ActorRef<A::Message>,
    actor: A,
    mailbox: Mailbox<A::Message>,
    state: watch::Sender<ActorState>,
}

impl<A: Actor> ActorCell<A> {
    pub fn new(name: impl Into<String>, actor: A) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ActorState::Created);
        Self {
            actor_ref: ActorRef {
                name: Arc::from(name.into()),
                tx,
                state: state_rx,
            },
            actor,
            mailbox: Mailbox { rx },
            state,
        }
    }

    /// Handle to the actor. Messages sent before `start` are queued.
    pub fn actor_ref(&self) -> &ActorRef<A::Message> {
        &self.actor_ref
    }

    /// Spawn the run loop on its own task. Must be called inside a tokio runtime.
    pub fn start(self) -> ActorRef<A::Message> {
        let ActorCell {
            actor_ref,
            mut actor,
            mut mailbox,
            state,
        } = self;
        state.send_replace(ActorState::Running);
        let guard = TerminateOnDrop {
            name: Arc::clone(&actor_ref.name),
            state,
        };
        tokio::spawn(async move {
            match actor.run(&mut mailbox).await {
                Ok(()) => debug!(actor = %guard.name, "run loop returned"),
                Err(ActorExit) => debug!(actor = %guard.name, "run loop exited on sentinel"),
            }
            drop(mailbox);
            drop(guard);
        });
        actor_ref
    }
}

/// Marks the actor terminated when its task finishes, including by panic.
struct TerminateOnDrop {
    name: Arc<str>,
    state: watch::Sender<ActorState>,
}

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(actor = %self.name, "actor panicked");
        }
        self.state.send_replace(ActorState::Terminated);
    }
}
