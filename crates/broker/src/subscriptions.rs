// crates/broker/src/subscriptions.rs
//! Dual subscription index: job → subscribers and connection → jobs.
//!
//! Both maps are private and only change together, so for every connection
//! `C` and job `J`: `C ∈ subscribers(J)` iff `J ∈ jobs_for(C)`.

use std::collections::{HashMap, HashSet};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::{BrokerError, BrokerResult};
use crate::registry::JobRegistry;
use crate::types::JobId;

#[derive(Debug, Default)]
pub struct Subscriptions {
    subscribers: HashMap<JobId, HashMap<ConnectionId, ConnectionHandle>>,
    tracked: HashMap<ConnectionId, HashSet<JobId>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the subscribers of `job_id`.
    ///
    /// Fails with `UnknownJob` if the registry has no such job. Returns
    /// `false` if the connection was already subscribed.
    pub fn subscribe(
        &mut self,
        jobs: &JobRegistry,
        job_id: &str,
        conn: &ConnectionHandle,
    ) -> BrokerResult<bool> {
        if !jobs.contains(job_id) {
            return Err(BrokerError::UnknownJob(job_id.to_string()));
        }
        let added = self
            .subscribers
            .entry(job_id.to_string())
            .or_default()
            .insert(conn.id(), conn.clone())
            .is_none();
        self.track(conn.id(), job_id);
        Ok(added)
    }

    pub fn unsubscribe(&mut self, job_id: &str, conn: ConnectionId) {
        if let Some(set) = self.subscribers.get_mut(job_id) {
            set.remove(&conn);
            if set.is_empty() {
                self.subscribers.remove(job_id);
            }
        }
        self.untrack(conn, job_id);
    }

    /// Current subscribers of a job, by value.
    pub fn snapshot(&self, job_id: &str) -> Vec<ConnectionHandle> {
        self.subscribers
            .get(job_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a job entirely, including its entries in the reverse index.
    pub fn drop_job(&mut self, job_id: &str) {
        if let Some(set) = self.subscribers.remove(job_id) {
            for conn in set.keys() {
                self.untrack(*conn, job_id);
            }
        }
    }

    pub fn jobs_for(&self, conn: ConnectionId) -> Vec<JobId> {
        self.tracked
            .get(&conn)
            .map(|jobs| jobs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unsubscribe a connection from everything it observes.
    ///
    /// Returns the jobs it was detached from.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Vec<JobId> {
        let jobs = self.jobs_for(conn);
        for job_id in &jobs {
            self.unsubscribe(job_id, conn);
        }
        jobs
    }

    pub fn is_subscribed(&self, job_id: &str, conn: ConnectionId) -> bool {
        self.subscribers
            .get(job_id)
            .is_some_and(|set| set.contains_key(&conn))
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers.get(job_id).map_or(0, HashMap::len)
    }

    pub fn connection_count(&self) -> usize {
        self.tracked.len()
    }

    /// Whether both indexes describe the same relation.
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .subscribers
            .iter()
            .all(|(job, set)| {
                !set.is_empty()
                    && set
                        .keys()
                        .all(|c| self.tracked.get(c).is_some_and(|jobs| jobs.contains(job)))
            });
        let backward = self.tracked.iter().all(|(conn, jobs)| {
            !jobs.is_empty()
                && jobs
                    .iter()
                    .all(|j| self.subscribers.get(j).is_some_and(|set| set.contains_key(conn)))
        });
        forward && backward
    }

    fn track(&mut self, conn: ConnectionId, job_id: &str) {
        self.tracked
            .entry(conn)
            .or_default()
            .insert(job_id.to_string());
    }

    fn untrack(&mut self, conn: ConnectionId, job_id: &str) {
        if let Some(jobs) = self.tracked.get_mut(&conn) {
            jobs.remove(job_id);
            if jobs.is_empty() {
                self.tracked.remove(&conn);
            }
        }
    }
}
