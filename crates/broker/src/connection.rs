// crates/broker/src/connection.rs
//! Observer connection handles.
//!
//! Each connection owns an outbound queue. The broker enqueues while holding
//! its lock and the transport drains the queue from its own task. Live
//! events count against a backlog limit: a peer that stops reading is cut
//! off once its backlog reaches the limit, and its receiver ends so the
//! transport closes. History replayed on resume is not counted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::warn;

use crate::types::JobEvent;

/// Live events a connection may have queued before it is dropped.
pub const DEFAULT_OUTBOUND_LIMIT: usize = 4096;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one observer transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Queued {
    event: JobEvent,
    counted: bool,
}

#[derive(Debug, Default)]
struct Backlog {
    live: AtomicUsize,
    overflowed: AtomicBool,
}

/// Sending half of a connection's outbound queue.
///
/// Enqueueing never waits on the network. A failed send means the transport
/// is gone or the peer fell too far behind; either way the broker drops the
/// connection's subscriptions.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Queued>,
    backlog: Arc<Backlog>,
    limit: usize,
}

/// Receiving half, drained by the transport's writer task.
#[derive(Debug)]
pub struct ConnectionReceiver {
    rx: mpsc::UnboundedReceiver<Queued>,
    backlog: Arc<Backlog>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh id and the default backlog limit.
    pub fn channel() -> (Self, ConnectionReceiver) {
        Self::with_limit(DEFAULT_OUTBOUND_LIMIT)
    }

    pub fn with_limit(limit: usize) -> (Self, ConnectionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(Backlog::default());
        (
            Self {
                id: ConnectionId::next(),
                tx,
                backlog: Arc::clone(&backlog),
                limit: limit.max(1),
            },
            ConnectionReceiver { rx, backlog },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a live event. Returns `false` if the peer is gone or its
    /// backlog is full.
    pub fn send(&self, event: JobEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.backlog.live.load(Ordering::Acquire) >= self.limit {
            self.backlog.overflowed.store(true, Ordering::Release);
            warn!(conn = %self.id, limit = self.limit, "outbound backlog full, dropping connection");
            return false;
        }
        self.backlog.live.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Queued { event, counted: true }).is_err() {
            self.backlog.live.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Queue a replayed history event, outside the backlog limit.
    pub(crate) fn send_replay(&self, event: JobEvent) -> bool {
        !self.is_closed()
            && self
                .tx
                .send(Queued {
                    event,
                    counted: false,
                })
                .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.backlog.overflowed.load(Ordering::Acquire)
    }

    /// Live events queued and not yet taken by the receiver.
    pub fn backlog(&self) -> usize {
        self.backlog.live.load(Ordering::Acquire)
    }
}

impl ConnectionReceiver {
    /// Next queued event; `None` once every handle is dropped or the
    /// connection was cut off for falling behind.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        if self.backlog.overflowed.load(Ordering::Acquire) {
            return None;
        }
        let queued = self.rx.recv().await?;
        Some(self.take(queued))
    }

    pub fn try_recv(&mut self) -> Result<JobEvent, TryRecvError> {
        if self.backlog.overflowed.load(Ordering::Acquire) {
            return Err(TryRecvError::Disconnected);
        }
        let queued = self.rx.try_recv()?;
        Ok(self.take(queued))
    }

    fn take(&self, queued: Queued) -> JobEvent {
        if queued.counted {
            self.backlog.live.fetch_sub(1, Ordering::AcqRel);
        }
        queued.event
    }
}
