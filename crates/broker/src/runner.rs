// crates/broker/src/runner.rs
//! Contract between the broker and the code that performs a job's work.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::error::{BrokerError, BrokerResult};
use crate::types::{EventKind, JobId};

/// Performs the work behind a job.
///
/// Implementations report through the [`Notifier`]: any number of
/// non-terminal events, then exactly one `complete` or `error`. Returning
/// without a terminal event is tolerated: `Ok` becomes `complete`, `Err`
/// becomes `error`.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, input: String, notifier: Notifier) -> anyhow::Result<()>;
}

/// Publish callback bound to a single job.
#[derive(Clone)]
pub struct Notifier {
    broker: Broker,
    job_id: JobId,
}

impl Notifier {
    pub fn new(broker: Broker, job_id: JobId) -> Self {
        Self { broker, job_id }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Publish an event for this job.
    ///
    /// A job that expired in the meantime is logged and otherwise ignored;
    /// other errors are returned to the runner.
    pub fn notify(&self, kind: impl Into<EventKind>, payload: Value) -> BrokerResult<()> {
        let kind = kind.into();
        match self.broker.publish(&self.job_id, kind.clone(), payload) {
            Err(BrokerError::UnknownJob(_)) => {
                warn!(job_id = %self.job_id, kind = %kind, "job expired, event dropped");
                Ok(())
            }
            other => other,
        }
    }

    /// Whether the job has already recorded its terminal event (or is gone).
    pub fn is_finished(&self) -> bool {
        self.broker
            .status(&self.job_id)
            .map_or(true, |status| status.is_terminal())
    }
}

/// Run `runner` for `job_id` on its own task.
///
/// The outer task watches the runner so that a panic or an early return
/// still ends the job with a terminal event.
pub fn spawn_job(
    broker: &Broker,
    runner: Arc<dyn JobRunner>,
    job_id: JobId,
    input: String,
) -> JoinHandle<()> {
    let notifier = Notifier::new(broker.clone(), job_id);
    tokio::spawn(async move {
        let inner = notifier.clone();
        let task = tokio::spawn(async move { runner.run(input, inner).await });
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("job runner aborted: {e}")),
        };

        if notifier.is_finished() {
            if let Err(e) = outcome {
                debug!(job_id = %notifier.job_id(), error = %e, "runner error after terminal event");
            }
            return;
        }
        let result = match outcome {
            Ok(()) => notifier.notify(EventKind::Complete, Value::Null),
            Err(e) => {
                warn!(job_id = %notifier.job_id(), error = %e, "job failed");
                notifier.notify(EventKind::Error, json!({ "message": format!("{e:#}") }))
            }
        };
        if let Err(e) = result {
            debug!(job_id = %notifier.job_id(), error = %e, "terminal event not recorded");
        }
    })
}
