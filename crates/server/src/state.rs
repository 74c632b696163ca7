// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use seqrelay_broker::{Broker, JobRunner};

use crate::intake::FastaIntakeRunner;
use crate::search_config::SearchConfigStore;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job event broker shared by every WebSocket connection.
    pub broker: Broker,
    /// Runner spawned for each started job.
    pub runner: Arc<dyn JobRunner>,
    /// Persistent search configuration.
    pub search_config: SearchConfigStore,
    /// Root of the per-job results folders.
    pub results_dir: PathBuf,
}

impl AppState {
    pub fn new(
        broker: Broker,
        runner: Arc<dyn JobRunner>,
        search_config: SearchConfigStore,
        results_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            broker,
            runner,
            search_config,
            results_dir,
        })
    }

    /// State rooted at `dir`: results under `dir/results`, config at
    /// `dir/config`, intake runner and default broker settings.
    pub fn in_dir(dir: &Path) -> Arc<Self> {
        let results_dir = dir.join("results");
        Self::new(
            Broker::default(),
            Arc::new(FastaIntakeRunner::new(results_dir.clone())),
            SearchConfigStore::new(dir.join("config")),
            results_dir,
        )
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::in_dir(dir.path());
        assert_eq!(state.results_dir, dir.path().join("results"));
        assert_eq!(state.search_config.path(), dir.path().join("config"));
        assert!(state.uptime_secs() < 5);
    }
}
