//! Dedicated writer task for outbound frames.
//!
//! Every connection owns exactly one writer task. Callers (the client's
//! call path, the server's per-call tasks) hand frames to it through an mpsc
//! channel, so no lock guards the write half and ready frames are batched
//! into vectored writes.
//!
//! # Architecture
//!
//! ```text
//! Call 1 ─┐
//! Call 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Call N ─┘
//! ```
//!
//! When every [`WriterHandle`] is dropped the task writes what is still
//! queued, flushes, shuts the write half down and exits.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::config::duration_ms;
use crate::error::{Result, RpcError};
use crate::protocol::{Header, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Poll interval while waiting for backpressure to clear.
const BACKPRESSURE_CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// A frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Codec payload.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Frame carrying an encoded call.
    pub fn call(payload: Bytes) -> Result<Self> {
        Ok(Self::new(&Header::call(payload_length(&payload)?), payload))
    }

    /// Frame carrying an encoded reply.
    pub fn reply(payload: Bytes) -> Result<Self> {
        Ok(Self::new(&Header::reply(payload_length(&payload)?), payload))
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

fn payload_length(payload: &Bytes) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| {
        RpcError::Protocol(format!(
            "Payload size {} does not fit a frame",
            payload.len()
        ))
    })
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    #[serde(rename = "backpressure_timeout_ms", with = "duration_ms")]
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; the task stops once every clone is dropped.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending frames.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, failing with
    /// [`RpcError::BackpressureTimeout`] after the configured duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Count before sending so the writer never decrements below zero.
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            RpcError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                tracing::warn!(
                    pending = self.pending.load(Ordering::Acquire),
                    "Backpressure did not clear in {:?}",
                    self.timeout
                );
                return Err(RpcError::BackpressureTimeout);
            }

            tokio::time::sleep(BACKPRESSURE_CHECK_INTERVAL).await;
        }
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// The spawned writer task, owned by its connection.
///
/// A connection's read loop selects on [`exited`](Self::exited) so a failed
/// write tears the connection down even while the peer stays quiet.
#[derive(Debug)]
pub struct WriterTask {
    handle: Option<JoinHandle<Result<()>>>,
}

impl WriterTask {
    /// Resolves once the writer stops, with the error that stopped it.
    ///
    /// Cancel safe. Once it has resolved, later calls stay pending.
    pub async fn exited(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.handle = None;
        joined_result(joined)
    }

    /// Wait up to `limit` for the writer to flush and shut down, then abort it.
    pub async fn drain(mut self, limit: Duration) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => {
                if let Err(e) = joined_result(joined) {
                    tracing::debug!("Writer finished with error: {}", e);
                }
            }
            Err(_) => {
                tracing::warn!("Writer did not drain in {:?}, aborting", limit);
                handle.abort();
            }
        }
    }
}

fn joined_result(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.unwrap_or_else(|e| {
        tracing::error!("Writer task failed: {}", e);
        Err(RpcError::ConnectionClosed)
    })
}

/// Spawn the writer task on `runtime` and return a handle for sending frames.
///
/// The task ends once the queue is drained and the write half is shut down,
/// or with the first write error.
pub fn spawn_writer_task<W>(
    runtime: &Handle,
    writer: W,
    config: &WriterConfig,
) -> (WriterHandle, WriterTask)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        Arc::clone(&pending),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = WriterTask {
        handle: Some(runtime.spawn(writer_loop(rx, writer, pending))),
    };

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let written = write_batch(&mut writer, &batch).await;
        batch.clear();
        pending.fetch_sub(batch_size, Ordering::Release);

        if let Err(e) = written {
            tracing::debug!("Writer stopped: {}", e);
            return Err(e);
        }
    }

    // Every handle is gone: release the write half so the peer sees EOF.
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            slices.push(IoSlice::new(&frame.header[skip_bytes.saturating_sub(offset)..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                slices.push(IoSlice::new(
                    &frame.payload[skip_bytes.saturating_sub(offset)..],
                ));
            }
            offset = payload_end;
        }
    }

    slices
}
