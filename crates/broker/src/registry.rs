// crates/broker/src/registry.rs
//! Authoritative table of live jobs and their event history.
//!
//! `JobRegistry` is a plain map with no locking of its own. The [`Broker`]
//! owns it behind its mutex, which is what makes each operation here atomic
//! with respect to subscription changes.
//!
//! [`Broker`]: crate::Broker

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{BrokerError, BrokerResult};
use crate::types::{EventKind, JobEvent, JobId, JobStatus};

/// Mutable state of a single job.
#[derive(Debug)]
struct JobRecord {
    status: JobStatus,
    history: Vec<JobEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    result_location: Option<String>,
}

/// Immutable copy of a job taken at call time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub history: Vec<JobEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_location: Option<String>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobRecord>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new running job with an empty history.
    pub fn create(&mut self, job_id: &str) -> BrokerResult<()> {
        if self.jobs.contains_key(job_id) {
            return Err(BrokerError::DuplicateJob(job_id.to_string()));
        }
        let now = Utc::now();
        self.jobs.insert(
            job_id.to_string(),
            JobRecord {
                status: JobStatus::Running,
                history: Vec::new(),
                created_at: now,
                updated_at: now,
                result_location: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> BrokerResult<JobSnapshot> {
        let record = self
            .jobs
            .get(job_id)
            .ok_or_else(|| BrokerError::UnknownJob(job_id.to_string()))?;
        Ok(JobSnapshot {
            job_id: job_id.to_string(),
            status: record.status,
            history: record.history.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            result_location: record.result_location.clone(),
        })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|r| r.status)
    }

    /// Clone of the history, in emission order.
    pub fn history(&self, job_id: &str) -> BrokerResult<Vec<JobEvent>> {
        self.jobs
            .get(job_id)
            .map(|r| r.history.clone())
            .ok_or_else(|| BrokerError::UnknownJob(job_id.to_string()))
    }

    /// Move a job into a terminal status.
    ///
    /// Returns `Ok(false)` when the job was already terminal; the first
    /// terminal status sticks.
    pub fn set_terminal(&mut self, job_id: &str, status: JobStatus) -> BrokerResult<bool> {
        debug_assert!(status.is_terminal());
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::UnknownJob(job_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = status;
        Ok(true)
    }

    /// Append an event to a running job's history.
    ///
    /// Terminal kinds flip the status before the append so the terminal
    /// event is the last one ever recorded.
    pub fn record(&mut self, event: &JobEvent) -> BrokerResult<()> {
        let job_id = event
            .job_id
            .as_deref()
            .ok_or_else(|| BrokerError::Protocol("event without job id".to_string()))?;
        match self.status(job_id) {
            None => return Err(BrokerError::UnknownJob(job_id.to_string())),
            Some(status) if status.is_terminal() => {
                return Err(BrokerError::JobTerminated(job_id.to_string()))
            }
            Some(_) => {}
        }
        if let Some(status) = event.kind.terminal_status() {
            self.set_terminal(job_id, status)?;
        }

        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::UnknownJob(job_id.to_string()))?;
        if event.kind == EventKind::Folder {
            if let Some(folder) = event.payload.get("folderId").and_then(|v| v.as_str()) {
                record.result_location = Some(folder.to_string());
            }
        }
        record.updated_at = event.timestamp;
        record.history.push(event.clone());
        Ok(())
    }

    /// Remove every terminal job whose last update is older than `cutoff`.
    pub fn expire_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, r)| r.status.is_terminal() && r.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|r| r.status == JobStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn event(job_id: &str, kind: EventKind) -> JobEvent {
        JobEvent::new(kind, Some(job_id.to_string()), json!({}))
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        assert_eq!(reg.create("j1"), Err(BrokerError::DuplicateJob("j1".into())));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_get_unknown_job() {
        let reg = JobRegistry::new();
        assert_eq!(reg.get("nope"), Err(BrokerError::UnknownJob("nope".into())));
    }

    #[test]
    fn test_new_job_is_running_with_empty_history() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        let snap = reg.get("j1").unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert!(snap.history.is_empty());
        assert_eq!(snap.created_at, snap.updated_at);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_appends() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        reg.record(&event("j1", EventKind::JobStarted)).unwrap();
        let snap = reg.get("j1").unwrap();
        reg.record(&event("j1", EventKind::Progress)).unwrap();
        assert_eq!(snap.history.len(), 1);
        assert_eq!(reg.get("j1").unwrap().history.len(), 2);
    }

    #[test]
    fn test_set_terminal_is_monotone() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        assert_eq!(reg.set_terminal("j1", JobStatus::Error), Ok(true));
        assert_eq!(reg.set_terminal("j1", JobStatus::Completed), Ok(false));
        assert_eq!(reg.status("j1"), Some(JobStatus::Error));
    }

    #[test]
    fn test_history_frozen_after_terminal_event() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        reg.record(&event("j1", EventKind::JobStarted)).unwrap();
        reg.record(&event("j1", EventKind::Complete)).unwrap();
        assert_eq!(reg.status("j1"), Some(JobStatus::Completed));

        let err = reg.record(&event("j1", EventKind::Progress)).unwrap_err();
        assert_eq!(err, BrokerError::JobTerminated("j1".into()));
        let err = reg.record(&event("j1", EventKind::Error)).unwrap_err();
        assert_eq!(err, BrokerError::JobTerminated("j1".into()));

        let history = reg.history("j1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().kind, EventKind::Complete);
    }

    #[test]
    fn test_folder_event_sets_result_location() {
        let mut reg = JobRegistry::new();
        reg.create("j1").unwrap();
        let folder = JobEvent::new(
            EventKind::Folder,
            Some("j1".into()),
            json!({ "folderId": "j1-results" }),
        );
        reg.record(&folder).unwrap();
        assert_eq!(reg.get("j1").unwrap().result_location.as_deref(), Some("j1-results"));
    }

    #[test]
    fn test_expire_only_removes_old_terminal_jobs() {
        let mut reg = JobRegistry::new();
        reg.create("running").unwrap();
        reg.create("done").unwrap();
        reg.record(&event("done", EventKind::Complete)).unwrap();

        // Cutoff in the past: nothing is old enough yet.
        assert!(reg.expire_older_than(Utc::now() - Duration::hours(1)).is_empty());

        // Cutoff in the future: only the terminal job goes.
        let removed = reg.expire_older_than(Utc::now() + Duration::hours(2));
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(reg.contains("running"));
        assert!(!reg.contains("done"));
    }
}
