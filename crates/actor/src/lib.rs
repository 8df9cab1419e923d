//! Actor runtime for tasq: mailbox actors, a tracking actor system and
//! routers that spread jobs across a pool of worker actors.

pub mod error;
pub mod mailbox;
pub mod router;
pub mod system;

pub use error::ActorError;
pub use mailbox::{Actor, ActorCell, ActorExit, ActorRef, ActorState, Mailbox};
pub use router::{JobRequest, RoundRobinRouter, Routed, Router};
pub use system::ActorSystem;
