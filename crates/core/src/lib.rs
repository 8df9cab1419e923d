pub mod config;
pub mod error;
pub mod future;
pub mod job;

pub use config::ClientConfig;
pub use error::*;
pub use future::TasqFuture;
pub use job::*;
