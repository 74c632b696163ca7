// crates/broker/src/broker.rs
//! The job-event broker.
//!
//! All mutable state (the job table and both subscription indexes) sits
//! behind one mutex, and every public operation holds it exactly once.
//! Delivery to a subscriber is an enqueue onto that connection's outbound
//! channel; the socket write happens later in the connection's writer task,
//! outside the lock. Because appends and enqueues share the critical
//! section, every observer of a job sees its events in publish order, and a
//! resuming observer gets the full history before any later live event.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionReceiver, DEFAULT_OUTBOUND_LIMIT};
use crate::error::{BrokerError, BrokerResult};
use crate::registry::{JobRegistry, JobSnapshot};
use crate::subscriptions::Subscriptions;
use crate::types::{EventKind, JobEvent, JobId, JobStatus};

/// How long a finished job stays replayable after its last event.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Upper bound on id generation attempts before giving up.
pub const DEFAULT_ID_ATTEMPTS: usize = 16;

const MAX_SUGGESTED_ID_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub retention: Duration,
    pub id_attempts: usize,
    /// Live events a connection may have queued before it is dropped.
    pub outbound_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            id_attempts: DEFAULT_ID_ATTEMPTS,
            outbound_limit: DEFAULT_OUTBOUND_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BrokerState {
    pub(crate) jobs: JobRegistry,
    pub(crate) subscriptions: Subscriptions,
}

/// Result of starting a job on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJob {
    pub job_id: JobId,
    /// Whether the client-suggested id was used as-is.
    pub suggestion_honored: bool,
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub jobs: usize,
    pub running: usize,
    pub connections: usize,
}

/// Shared handle to the broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
    config: Arc<BrokerConfig>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Open an outbound queue for a new observer connection.
    pub fn connect(&self) -> (ConnectionHandle, ConnectionReceiver) {
        ConnectionHandle::with_limit(self.config.outbound_limit)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("broker mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Create a job owned by `conn` and subscribe it.
    ///
    /// The connection's previous subscriptions are dropped first. The
    /// `job_started` event is recorded and delivered before returning.
    pub fn start_job(
        &self,
        conn: &ConnectionHandle,
        suggested_id: Option<&str>,
        started_payload: Value,
    ) -> BrokerResult<StartedJob> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let cleared = state.subscriptions.remove_connection(conn.id());
        if !cleared.is_empty() {
            debug!(conn = %conn.id(), jobs = ?cleared, "cleared subscriptions before start");
        }

        let started = allocate_job(&mut state.jobs, suggested_id, self.config.id_attempts)?;
        state.subscriptions.subscribe(&state.jobs, &started.job_id, conn)?;

        let event = JobEvent::new(
            EventKind::JobStarted,
            Some(started.job_id.clone()),
            started_payload,
        );
        deliver(state, event)?;

        counter!("jobs_started_total").increment(1);
        gauge!("live_jobs").set(state.jobs.len() as f64);
        info!(job_id = %started.job_id, conn = %conn.id(), "job started");
        Ok(started)
    }

    /// Subscribe `conn` to an existing job and replay its history.
    ///
    /// Replay and registration happen under one lock hold, followed by a
    /// `resume_ack`. Returns the number of replayed events.
    pub fn resume(&self, conn: &ConnectionHandle, job_id: &str) -> BrokerResult<usize> {
        let mut state = self.lock();
        let BrokerState {
            jobs,
            subscriptions,
        } = &mut *state;

        subscriptions.subscribe(jobs, job_id, conn)?;
        let snapshot = jobs.get(job_id)?;
        let replayed = snapshot.history.len();

        let mut delivered = snapshot.history.into_iter().all(|e| conn.send_replay(e));
        if delivered {
            let ack = JobEvent::new(
                EventKind::ResumeAck,
                Some(job_id.to_string()),
                json!({ "status": snapshot.status, "replayed": replayed }),
            );
            delivered = conn.send(ack);
        }
        if !delivered {
            subscriptions.remove_connection(conn.id());
            counter!("subscriber_cleanups_total").increment(1);
            debug!(job_id = %job_id, conn = %conn.id(), "connection closed during replay");
        }

        info!(job_id = %job_id, conn = %conn.id(), replayed, "job resumed");
        Ok(replayed)
    }

    /// Record an event for a job and fan it out to its subscribers.
    ///
    /// A terminal kind finalises the job and schedules a reaper pass.
    pub fn publish(&self, job_id: &str, kind: EventKind, payload: Value) -> BrokerResult<()> {
        if kind.is_direct_reply() {
            return Err(BrokerError::Protocol(format!(
                "'{kind}' is a direct reply and cannot be published"
            )));
        }
        let terminal = kind.terminal_status().is_some();
        let event = JobEvent::new(kind, Some(job_id.to_string()), payload);
        {
            let mut state = self.lock();
            deliver(&mut state, event)?;
        }
        if terminal {
            self.schedule_reap();
        }
        Ok(())
    }

    /// Detach a connection from one job.
    pub fn unsubscribe(&self, job_id: &str, conn: ConnectionId) {
        self.lock().subscriptions.unsubscribe(job_id, conn);
    }

    /// Detach a connection from every job it observes.
    pub fn disconnect(&self, conn: ConnectionId) -> Vec<JobId> {
        let jobs = self.lock().subscriptions.remove_connection(conn);
        debug!(conn = %conn, jobs = jobs.len(), "connection cleaned up");
        jobs
    }

    pub fn snapshot(&self, job_id: &str) -> BrokerResult<JobSnapshot> {
        self.lock().jobs.get(job_id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.lock().jobs.status(job_id)
    }

    pub fn jobs_for(&self, conn: ConnectionId) -> Vec<JobId> {
        self.lock().subscriptions.jobs_for(conn)
    }

    pub fn is_subscribed(&self, job_id: &str, conn: ConnectionId) -> bool {
        self.lock().subscriptions.is_subscribed(job_id, conn)
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.lock();
        BrokerStats {
            jobs: state.jobs.len(),
            running: state.jobs.running_count(),
            connections: state.subscriptions.connection_count(),
        }
    }

    /// Whether the two subscription indexes agree.
    pub fn subscriptions_consistent(&self) -> bool {
        self.lock().subscriptions.is_consistent()
    }

    fn schedule_reap(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let broker = self.clone();
                handle.spawn(async move {
                    broker.reap();
                });
            }
            Err(_) => {
                self.reap();
            }
        }
    }
}

/// Insert a job under the suggested id when usable, otherwise under a
/// freshly generated random id.
fn allocate_job(
    jobs: &mut JobRegistry,
    suggested_id: Option<&str>,
    attempts: usize,
) -> BrokerResult<StartedJob> {
    if let Some(id) = suggested_id.filter(|id| is_valid_job_id(id)) {
        if jobs.create(id).is_ok() {
            return Ok(StartedJob {
                job_id: id.to_string(),
                suggestion_honored: true,
            });
        }
        debug!(job_id = %id, "suggested job id in use, generating a new one");
    }

    for _ in 0..attempts {
        let id = uuid::Uuid::new_v4().simple().to_string();
        match jobs.create(&id) {
            Ok(()) => {
                return Ok(StartedJob {
                    job_id: id,
                    suggestion_honored: false,
                })
            }
            Err(BrokerError::DuplicateJob(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(BrokerError::IdExhausted(attempts))
}

fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SUGGESTED_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Append `event` to its job's history and enqueue it for every subscriber.
///
/// Subscribers whose queue is closed are unsubscribed everywhere; delivery
/// to the rest continues.
fn deliver(state: &mut BrokerState, event: JobEvent) -> BrokerResult<()> {
    if let Err(e) = state.jobs.record(&event) {
        warn!(error = %e, kind = %event.kind, "event not recorded");
        return Err(e);
    }
    let job_id = event.job_id.clone().unwrap_or_default();
    counter!("events_published_total", "type" => event.kind.to_string()).increment(1);

    let subscribers = state.subscriptions.snapshot(&job_id);
    let mut failed = Vec::new();
    for conn in subscribers {
        if !conn.send(event.clone()) {
            failed.push(conn.id());
        }
    }
    for conn in failed {
        let jobs = state.subscriptions.remove_connection(conn);
        counter!("subscriber_cleanups_total").increment(1);
        debug!(conn = %conn, jobs = jobs.len(), "dropped unreachable subscriber");
    }
    Ok(())
}
