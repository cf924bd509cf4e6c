//! Client-side request correlation.
//!
//! The [`Correlator`] owns the pending-call table of one connection. The
//! calling side inserts an entry when it issues a call; the reading side
//! removes it when the matching reply arrives. Each entry resolves exactly
//! once: with the reply, with [`RpcError::ConnectionClosed`] when the
//! connection goes away, or not at all when the caller gives up (dropping
//! the [`PendingCall`] removes the entry).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};
use crate::protocol::RequestId;
use crate::Value;

type Slot = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct State {
    pending: HashMap<RequestId, Slot>,
    closed: bool,
}

/// Pending-call table with id allocation.
pub struct Correlator {
    next_id: AtomicU32,
    state: Mutex<State>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Allocate a fresh id and register a pending call under it.
    ///
    /// Ids are never 0 and never collide with a call still pending, even
    /// after the counter wraps.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] once [`fail_all`](Self::fail_all) ran.
    pub fn register(self: &Arc<Self>) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed);
        }

        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };
        state.pending.insert(id, tx);
        drop(state);

        Ok(PendingCall {
            id,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Deliver the result for `id`.
    ///
    /// Returns `false` when no call with this id is pending (unknown,
    /// duplicate, or abandoned); the result is dropped.
    pub fn resolve(&self, id: RequestId, result: Result<Value>) -> bool {
        let slot = self.state.lock().pending.remove(&id);
        match slot {
            // A send error means the caller dropped its receiver in the
            // meantime; the entry is gone either way.
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Fail every pending call with [`RpcError::ConnectionClosed`] and
    /// refuse new registrations. Returns how many calls were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().map(|(_, tx)| tx).collect()
        };

        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
        count
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn forget(&self, id: RequestId) {
        self.state.lock().pending.remove(&id);
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Correlator")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A registered call awaiting its reply.
///
/// Dropping it before the reply arrives cancels the call locally; nothing
/// is sent to the server.
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    correlator: Arc<Correlator>,
}

impl PendingCall {
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the result.
    pub async fn wait(mut self) -> Result<Value> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}
