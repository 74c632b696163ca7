// crates/broker/src/types.rs
//! Wire-level types shared by the broker and the connection handler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Opaque identifier of a job. Unique among live jobs.
pub type JobId = String;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Event type tag carried in the outbound envelope's `type` field.
///
/// The runner may emit kinds the broker does not know about; those travel
/// as [`EventKind::Custom`] and are treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobStarted,
    JobAck,
    ResumeAck,
    Progress,
    Folder,
    Complete,
    Error,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::JobStarted => "job_started",
            EventKind::JobAck => "job_ack",
            EventKind::ResumeAck => "resume_ack",
            EventKind::Progress => "progress",
            EventKind::Folder => "folder",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Custom(s) => s,
        }
    }

    /// Terminal status this kind moves a job into, if any.
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self {
            EventKind::Complete => Some(JobStatus::Completed),
            EventKind::Error => Some(JobStatus::Error),
            _ => None,
        }
    }

    /// Direct replies are sent to one connection and never recorded in history.
    pub fn is_direct_reply(&self) -> bool {
        matches!(self, EventKind::JobAck | EventKind::ResumeAck)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "job_started" => EventKind::JobStarted,
            "job_ack" => EventKind::JobAck,
            "resume_ack" => EventKind::ResumeAck,
            "progress" => EventKind::Progress,
            "folder" => EventKind::Folder,
            "complete" => EventKind::Complete,
            "error" => EventKind::Error,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from(s.as_str()))
    }
}

/// Outbound event envelope.
///
/// Stored by value in a job's history; every subscriber receives its own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: Option<JobId>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(kind: EventKind, job_id: Option<JobId>, payload: Value) -> Self {
        Self {
            kind,
            job_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Protocol-level error that may or may not reference a job.
    pub fn error(job_id: Option<JobId>, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            job_id,
            serde_json::json!({ "message": message.into() }),
        )
    }

    pub fn to_json(&self) -> String {
        // Envelope fields are all plain JSON values; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
