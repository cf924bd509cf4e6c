//! Connection lifecycle: `Open -> Closing -> Closed`.
//!
//! `close()` moves an open connection to `Closing`, which tells its tasks to
//! stop taking new work. Once they have drained and the stream is released
//! the owner calls `mark_closed()`, waking everyone in `wait_closed()`.

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{Result, RpcError};

/// Phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Open,
    Closing,
    Closed,
}

/// Shared lifecycle state of one connection (or server).
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::Open);
        Self { tx }
    }

    pub fn phase(&self) -> Phase {
        *self.tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Request close. Returns `true` for the call that moved the phase out
    /// of `Open`.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|phase| {
            if *phase == Phase::Open {
                *phase = Phase::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Everything is released.
    pub fn mark_closed(&self) {
        self.tx.send_replace(Phase::Closed);
    }

    /// Resolves once close was requested (or already finished).
    pub async fn closing(&self) {
        self.wait_for(Phase::Closing).await;
    }

    /// Resolves once the connection is fully closed.
    pub async fn wait_closed(&self) {
        self.wait_for(Phase::Closed).await;
    }

    async fn wait_for(&self, phase: Phase) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|current| *current >= phase).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// The runtime a connection schedules its tasks on: the one given to the
/// builder, else the runtime of the calling context.
pub(crate) fn resolve_runtime(explicit: Option<Handle>) -> Result<Handle> {
    match explicit {
        Some(handle) => Ok(handle),
        None => Handle::try_current().map_err(|e| {
            RpcError::Validation(format!("no runtime given and none is running: {e}"))
        }),
    }
}
