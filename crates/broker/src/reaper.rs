// crates/broker/src/reaper.rs
//! Retention of finished jobs.
//!
//! There is no timer: a pass runs after each terminal event, so a finished
//! job may outlive its window until the next job finishes.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::types::JobId;

impl Broker {
    /// Remove terminal jobs whose last event is older than the retention window.
    pub fn reap(&self) -> Vec<JobId> {
        self.reap_at(Utc::now())
    }

    /// Reaper pass evaluated as if the current time were `now`.
    pub fn reap_at(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let retention = chrono::Duration::from_std(self.config().retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = now - retention;

        let mut state = self.lock();
        let expired = state.jobs.expire_older_than(cutoff);
        for job_id in &expired {
            state.subscriptions.drop_job(job_id);
        }
        gauge!("live_jobs").set(state.jobs.len() as f64);
        drop(state);

        if expired.is_empty() {
            debug!(%cutoff, "reaper pass: nothing to expire");
        } else {
            counter!("jobs_expired_total").increment(expired.len() as u64);
            info!(count = expired.len(), %cutoff, "expired finished jobs");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::types::{EventKind, JobStatus};
    use crate::{BrokerConfig, BrokerError};
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_terminal_job_survives_until_window_elapses() {
        let broker = Broker::default();
        let (conn, _rx) = ConnectionHandle::channel();
        let job = broker.start_job(&conn, None, json!({})).unwrap().job_id;
        broker.publish(&job, EventKind::Complete, json!({})).unwrap();
        let finished_at = broker.snapshot(&job).unwrap().updated_at;

        assert!(broker.reap_at(finished_at + Duration::minutes(59)).is_empty());
        assert_eq!(broker.status(&job), Some(JobStatus::Completed));

        assert!(broker.reap_at(finished_at + Duration::seconds(3600)).is_empty());

        let expired = broker.reap_at(finished_at + Duration::seconds(3601));
        assert_eq!(expired, vec![job.clone()]);
        assert_eq!(broker.snapshot(&job), Err(BrokerError::UnknownJob(job.clone())));
        assert!(broker.jobs_for(conn.id()).is_empty());
        assert!(broker.subscriptions_consistent());
    }

    #[test]
    fn test_running_jobs_are_never_expired() {
        let broker = Broker::default();
        let (conn, _rx) = ConnectionHandle::channel();
        let job = broker.start_job(&conn, None, json!({})).unwrap().job_id;

        assert!(broker.reap_at(Utc::now() + Duration::days(30)).is_empty());
        assert_eq!(broker.status(&job), Some(JobStatus::Running));
    }

    #[test]
    fn test_expired_job_is_untracked_from_all_viewers() {
        let broker = Broker::new(BrokerConfig {
            retention: std::time::Duration::from_secs(10),
            ..BrokerConfig::default()
        });
        let (owner, _ro) = ConnectionHandle::channel();
        let (viewer, _rv) = ConnectionHandle::channel();
        let done = broker.start_job(&owner, None, json!({})).unwrap().job_id;
        broker.resume(&viewer, &done).unwrap();
        broker.publish(&done, EventKind::Error, json!({ "message": "x" })).unwrap();

        let (other_owner, _roo) = ConnectionHandle::channel();
        let live = broker.start_job(&other_owner, None, json!({})).unwrap().job_id;
        broker.resume(&viewer, &live).unwrap();

        let expired = broker.reap_at(Utc::now() + Duration::seconds(11));
        assert_eq!(expired, vec![done]);
        assert_eq!(broker.jobs_for(viewer.id()), vec![live]);
        assert!(broker.jobs_for(owner.id()).is_empty());
        assert!(broker.subscriptions_consistent());
    }

    #[tokio::test]
    async fn test_publish_terminal_schedules_reap() {
        let broker = Broker::new(BrokerConfig {
            retention: std::time::Duration::ZERO,
            ..BrokerConfig::default()
        });
        let (conn, _rx) = ConnectionHandle::channel();
        let job = broker.start_job(&conn, None, json!({})).unwrap().job_id;
        broker.publish(&job, EventKind::Complete, json!({})).unwrap();

        for _ in 0..50 {
            if broker.status(&job).is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(broker.status(&job), None);
        assert!(broker.jobs_for(conn.id()).is_empty());
    }
}
