// crates/broker/src/lib.rs
//! In-memory job event broker.
//!
//! Jobs are created by a connection, publish an ordered stream of events,
//! and end with exactly one terminal event. Any connection can attach to a
//! known job and receives its full history before live events. Finished
//! jobs are reaped once their retention window has passed.

pub mod broker;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod runner;
pub mod session;
pub mod subscriptions;
pub mod types;

pub use broker::{Broker, BrokerConfig, BrokerStats, StartedJob, DEFAULT_RETENTION};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionReceiver, DEFAULT_OUTBOUND_LIMIT};
pub use error::{BrokerError, BrokerResult};
pub use protocol::{decode, ClientMessage};
pub use registry::{JobRegistry, JobSnapshot};
pub use runner::{spawn_job, JobRunner, Notifier};
pub use session::{ConnectionSession, SessionState};
pub use subscriptions::Subscriptions;
pub use types::*;
