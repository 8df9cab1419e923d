//! Client side of tasq: broker connections, the job-scheduling client, and a
//! pool that spreads jobs over several remote supervisors.

pub mod broker_url;
pub mod client;
pub mod config;
pub mod connection;
pub mod message;
pub mod pool;
pub mod transport;
pub mod worker;

pub use broker_url::BrokerUrl;
pub use client::TasqClient;
pub use config::{PoolConfig, TasqConfig};
pub use connection::{BrokerConnection, LinkStatus, MemoryBroker};
pub use message::Message;
pub use pool::TasqClientPool;
pub use transport::Transport;
pub use worker::ClientWorker;

pub use tasq_core::{Job, JobResult, JobStatus, TasqError, TasqFuture};
