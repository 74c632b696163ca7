// crates/broker/src/session.rs
//! Per-connection protocol state machine.
//!
//! A `ConnectionSession` is transport-agnostic: the server feeds it inbound
//! text frames and drains the connection's outbound queue into the socket.
//! Dropping the session unsubscribes the connection from every job, so
//! cleanup runs on every exit path of the transport loop.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::BrokerError;
use crate::protocol::{decode, ClientMessage};
use crate::runner::{spawn_job, JobRunner};
use crate::types::{EventKind, JobEvent, JobId, JobStatus};

/// Ownership state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Owns no running job.
    Idle,
    /// Owns exactly one running job it created.
    Started(JobId),
}

pub struct ConnectionSession {
    broker: Broker,
    runner: Arc<dyn JobRunner>,
    handle: ConnectionHandle,
    owned: Option<JobId>,
}

impl ConnectionSession {
    pub fn new(broker: Broker, runner: Arc<dyn JobRunner>, handle: ConnectionHandle) -> Self {
        Self {
            broker,
            runner,
            handle,
            owned: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Current state; a session whose job has finished is back to `Idle`.
    pub fn state(&self) -> SessionState {
        match &self.owned {
            Some(job_id) if self.broker.status(job_id) == Some(JobStatus::Running) => {
                SessionState::Started(job_id.clone())
            }
            _ => SessionState::Idle,
        }
    }

    /// Jobs this connection currently receives events for.
    pub fn subscriptions(&self) -> Vec<JobId> {
        self.broker.jobs_for(self.handle.id())
    }

    /// Handle one inbound text frame.
    pub fn handle_text(&mut self, text: &str) {
        match decode(text) {
            ClientMessage::Start { input, job_id } => self.start(input, job_id.as_deref()),
            ClientMessage::ImplicitStart { input } => {
                debug!(conn = %self.id(), "unstructured message treated as start");
                self.start(input, None)
            }
            ClientMessage::Resume { job_id } => self.resume(&job_id),
            ClientMessage::Unrecognized { action } => {
                self.reply_error(None, format!("Unknown action: {action}"));
            }
            ClientMessage::Invalid { reason } => self.reply_error(None, reason),
        }
    }

    fn start(&mut self, input: String, suggested_id: Option<&str>) {
        let started_payload = json!({ "inputBytes": input.len() });
        let started = match self
            .broker
            .start_job(&self.handle, suggested_id, started_payload)
        {
            Ok(started) => started,
            Err(e) => {
                self.reply_error(e.job_id().cloned(), e.to_string());
                return;
            }
        };
        self.owned = Some(started.job_id.clone());

        let mut ack = json!({ "jobId": started.job_id });
        if let Some(requested) = suggested_id {
            ack["requestedJobId"] = json!(requested);
            ack["suggestionHonored"] = json!(started.suggestion_honored);
        }
        self.reply(JobEvent::new(
            EventKind::JobAck,
            Some(started.job_id.clone()),
            ack,
        ));

        spawn_job(
            &self.broker,
            Arc::clone(&self.runner),
            started.job_id,
            input,
        );
    }

    fn resume(&mut self, job_id: &str) {
        match self.broker.resume(&self.handle, job_id) {
            Ok(replayed) => {
                debug!(conn = %self.id(), job_id = %job_id, replayed, "resume served");
            }
            Err(e @ BrokerError::UnknownJob(_)) => {
                info!(conn = %self.id(), job_id = %job_id, "resume of unknown job");
                self.reply_error(Some(job_id.to_string()), e.to_string());
            }
            Err(e) => self.reply_error(Some(job_id.to_string()), e.to_string()),
        }
    }

    fn reply_error(&self, job_id: Option<JobId>, message: impl Into<String>) {
        self.reply(JobEvent::error(job_id, message));
    }

    fn reply(&self, event: JobEvent) {
        if !self.handle.send(event) {
            debug!(conn = %self.id(), "reply dropped, connection closed");
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        let jobs = self.broker.disconnect(self.handle.id());
        debug!(conn = %self.handle.id(), jobs = jobs.len(), "session closed");
    }
}
