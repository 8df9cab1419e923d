use thiserror::Error;

/// Errors raised by the actor runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActorError {
    #[error("pool size must be a positive integer, got {0}")]
    InvalidPoolSize(usize),

    #[error("router needs at least one worker")]
    EmptyPool,

    #[error("mailbox of actor {0} is closed")]
    MailboxClosed(String),
}
