// crates/observability/src/lib.rs
//! Tracing setup shared by the seqrelay binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset. Targets match by prefix, so this
/// also covers `seqrelay_broker` and `seqrelay_server`.
pub const DEFAULT_FILTER: &str = "warn,seqrelay=info";

/// Build the env filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// `json` switches the formatter to one JSON object per line. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init()
    }
}
