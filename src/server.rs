//! Server builder, listening server and per-connection serve loop.
//!
//! Each connection reads call frames, runs every call as its own task
//! through the [`Dispatcher`] and queues the replies on its writer task.
//! A slow call never holds up replies to the others; at
//! `max_concurrent_calls` the connection stops reading until one finishes.
//!
//! # Example
//!
//! ```no_run
//! use rpcwire::handler::Registry;
//! use rpcwire::ServerBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let mut registry = Registry::new();
//!     registry.sync("func", |call| Ok(json!(call.arg::<i64>(0)? + 1)));
//!
//!     let server = ServerBuilder::new(registry)
//!         .bind("tcp://127.0.0.1:9000")
//!         .await?;
//!     server.wait_closed().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::codec::{default_codec, Codec, SharedCodec};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, RpcError};
use crate::handler::Handler;
use crate::lifecycle::{resolve_runtime, Lifecycle, Phase};
use crate::mapper::{ErrorMapper, ErrorTable};
use crate::protocol::{CallReply, FrameBuffer};
use crate::transport::{Endpoint, Listener};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle, WriterTask};

/// Size of the buffer each read fills.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Builder for configuring and starting a server.
pub struct ServerBuilder {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    error_table: ErrorTable,
    codec: SharedCodec,
    runtime: Option<Handle>,
}

impl ServerBuilder {
    /// Serve `handler`: a [`Registry`](crate::handler::Registry), a map of
    /// methods, or any other [`Handler`].
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
            config: ServerConfig::default(),
            error_table: ErrorTable::builtin(),
            codec: default_codec(),
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of calls running at once per connection.
    ///
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Time in-flight calls get to finish once a connection closes.
    ///
    /// Default: 5 seconds
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Log faults raised by methods.
    pub fn log_exceptions(mut self, enabled: bool) -> Self {
        self.config.log_exceptions = enabled;
        self
    }

    /// Fault names that are never logged.
    pub fn exclude_log_exceptions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclude_log_exceptions = names.into_iter().map(Into::into).collect();
        self
    }

    /// Largest call payload accepted.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Allow-list of fault kinds sent unwrapped.
    pub fn error_table(mut self, table: ErrorTable) -> Self {
        self.error_table = table;
        self
    }

    /// Payload codec. Must match the clients'.
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Runtime the connection tasks and method invocations are spawned on.
    ///
    /// Default: the runtime current when binding.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Listen on `endpoint` (`tcp://host:port` or `unix:///path`).
    pub async fn bind(self, endpoint: &str) -> Result<Server> {
        let endpoint: Endpoint = endpoint.parse()?;
        self.bind_endpoint(&endpoint).await
    }

    pub async fn bind_endpoint(self, endpoint: &Endpoint) -> Result<Server> {
        let context = self.into_context()?;
        let listener = Listener::bind(endpoint).await?;
        let local_endpoint = listener.local_endpoint()?;
        tracing::info!(endpoint = %local_endpoint, "Listening");

        let lifecycle = Lifecycle::new();
        context.runtime.spawn(accept_loop(
            listener,
            Arc::clone(&context),
            lifecycle.clone(),
        ));

        Ok(Server {
            lifecycle,
            local_endpoint,
        })
    }

    /// Serve a single, already connected stream.
    pub fn serve_stream<S>(self, stream: S) -> Result<ServerConnection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let context = self.into_context()?;
        Ok(spawn_connection(&context, stream, "stream".to_string()))
    }

    fn into_context(self) -> Result<Arc<Context>> {
        let runtime = resolve_runtime(self.runtime)?;
        let dispatcher = Dispatcher::new(
            self.handler,
            Arc::new(ErrorMapper::new(self.error_table)),
            runtime.clone(),
        )
        .log_exceptions(
            self.config.log_exceptions,
            self.config.exclude_log_exceptions.iter().cloned(),
        );

        Ok(Arc::new(Context {
            dispatcher: Arc::new(dispatcher),
            codec: self.codec,
            config: self.config,
            runtime,
        }))
    }
}

/// Everything a connection needs, shared by all connections of a server.
struct Context {
    dispatcher: Arc<Dispatcher>,
    codec: SharedCodec,
    config: ServerConfig,
    runtime: Handle,
}

/// A listening server.
///
/// Dropping it closes the server like [`close`](Self::close).
#[derive(Debug)]
pub struct Server {
    lifecycle: Lifecycle,
    local_endpoint: Endpoint,
}

impl Server {
    /// The endpoint actually bound (with the real port for `:0`).
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local_endpoint
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) -> bool {
        self.lifecycle.close()
    }

    /// Wait until the listener and every connection are released.
    pub async fn wait_closed(&self) {
        self.lifecycle.wait_closed().await;
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.lifecycle.close();
    }
}

/// Handle to one served connection.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    lifecycle: Lifecycle,
    peer: Arc<str>,
}

impl ServerConnection {
    /// Printable peer address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Stop reading calls; in-flight calls get the drain timeout to finish.
    pub fn close(&self) -> bool {
        self.lifecycle.close()
    }

    pub async fn wait_closed(&self) {
        self.lifecycle.wait_closed().await;
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }
}

async fn accept_loop(listener: Listener, context: Arc<Context>, lifecycle: Lifecycle) {
    let mut connections: Vec<ServerConnection> = Vec::new();

    loop {
        let accepted = tokio::select! {
            _ = lifecycle.closing() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                connections.retain(|c| !c.is_closed());
                tracing::debug!(%peer, "Accepted connection");
                connections.push(spawn_connection(&context, stream, peer));
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::select! {
                    _ = lifecycle.closing() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }

    drop(listener);
    for connection in &connections {
        connection.close();
    }
    for connection in &connections {
        connection.wait_closed().await;
    }
    tracing::info!("Server closed");
    lifecycle.mark_closed();
}

fn spawn_connection<S>(context: &Arc<Context>, stream: S, peer: String) -> ServerConnection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) =
        spawn_writer_task(&context.runtime, write_half, &context.config.writer);

    let connection = ServerConnection {
        lifecycle: Lifecycle::new(),
        peer: Arc::from(peer),
    };

    context.runtime.spawn(run_connection(
        reader,
        Arc::clone(context),
        writer,
        writer_task,
        connection.clone(),
    ));

    connection
}

async fn run_connection<R>(
    reader: R,
    context: Arc<Context>,
    writer: WriterHandle,
    mut writer_task: WriterTask,
    connection: ServerConnection,
) where
    R: AsyncRead + Unpin,
{
    let lifecycle = &connection.lifecycle;
    let mut calls = JoinSet::new();

    match serve_loop(reader, &context, &writer, &mut writer_task, lifecycle, &mut calls).await {
        Ok(()) => tracing::debug!(peer = %connection.peer, "Connection finished"),
        Err(e) => tracing::error!(peer = %connection.peer, "Connection error: {}", e),
    }
    lifecycle.close();

    let drain = async {
        while let Some(joined) = calls.join_next().await {
            log_call_task(joined);
        }
    };
    if tokio::time::timeout(context.config.drain_timeout, drain).await.is_err() {
        tracing::warn!(
            peer = %connection.peer,
            aborted = calls.len(),
            "In-flight calls did not finish in {:?}, aborting",
            context.config.drain_timeout
        );
        calls.shutdown().await;
    }

    drop(writer);
    writer_task
        .drain(context.config.writer.backpressure_timeout)
        .await;

    lifecycle.mark_closed();
}

/// Read calls and start them until EOF, close, a framing error, or the
/// writer stopping.
async fn serve_loop<R>(
    mut reader: R,
    context: &Arc<Context>,
    writer: &WriterHandle,
    writer_task: &mut WriterTask,
    lifecycle: &Lifecycle,
    calls: &mut JoinSet<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let semaphore = Arc::new(Semaphore::new(context.config.max_concurrent_calls.max(1)));
    let mut frame_buffer = FrameBuffer::with_max_payload(context.config.max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = lifecycle.closing() => return Ok(()),
            exited = writer_task.exited() => {
                exited?;
                return Err(RpcError::ConnectionClosed);
            }
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            if frame.is_reply() {
                tracing::warn!("Unexpected reply frame on server connection, ignored");
                continue;
            }

            let request = match context.codec.decode_call(frame.payload()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Undecodable call dropped: {}", e);
                    continue;
                }
            };

            let permit = tokio::select! {
                _ = lifecycle.closing() => return Ok(()),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| RpcError::ConnectionClosed)?
                }
            };

            while let Some(joined) = calls.try_join_next() {
                log_call_task(joined);
            }

            let dispatcher = Arc::clone(&context.dispatcher);
            let codec = Arc::clone(&context.codec);
            let writer = writer.clone();
            let lifecycle = lifecycle.clone();

            calls.spawn_on(
                async move {
                    let _permit = permit;
                    let reply = dispatcher.dispatch(request).await;
                    if let Err(e) = send_reply(codec.as_ref(), &writer, &reply).await {
                        tracing::error!(id = reply.id, "Failed to send reply, closing connection: {}", e);
                        lifecycle.close();
                    }
                },
                &context.runtime,
            );
        }
    }
}

async fn send_reply(codec: &dyn Codec, writer: &WriterHandle, reply: &CallReply) -> Result<()> {
    let payload = codec.encode_reply(reply)?;
    writer.send(OutboundFrame::reply(Bytes::from(payload))?).await
}

fn log_call_task(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("Call task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Method, Registry};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_builder_configuration() {
        let builder = ServerBuilder::new(Registry::new())
            .max_concurrent_calls(8)
            .drain_timeout(Duration::from_millis(100))
            .log_exceptions(true)
            .exclude_log_exceptions(["key", "index"])
            .max_payload_size(4096)
            .max_pending_frames(16)
            .channel_capacity(4)
            .backpressure_timeout(Duration::from_secs(1));

        assert_eq!(builder.config.max_concurrent_calls, 8);
        assert_eq!(builder.config.drain_timeout, Duration::from_millis(100));
        assert!(builder.config.log_exceptions);
        assert_eq!(builder.config.exclude_log_exceptions, vec!["key", "index"]);
        assert_eq!(builder.config.max_payload_size, 4096);
        assert_eq!(builder.config.writer.max_pending_frames, 16);
        assert_eq!(builder.config.writer.channel_capacity, 4);
    }

    #[test]
    fn test_accepts_mapping_handler() {
        let mut map = HashMap::new();
        map.insert("func".to_string(), Method::sync(|_| Ok(json!(1))));
        let builder = ServerBuilder::new(map);
        assert!(builder.handler.resolve("func").is_ok());
    }

    #[tokio::test]
    async fn test_connection_closes_on_eof() {
        let (stream, peer) = tokio::io::duplex(64);
        let connection = ServerBuilder::new(Registry::new())
            .serve_stream(stream)
            .unwrap();
        assert!(connection.is_open());
        assert_eq!(connection.peer(), "stream");

        drop(peer);
        tokio::time::timeout(Duration::from_secs(1), connection.wait_closed())
            .await
            .unwrap();
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_server_close() {
        let server = ServerBuilder::new(Registry::new())
            .bind("tcp://127.0.0.1:0")
            .await
            .unwrap();
        assert!(matches!(server.local_endpoint(), Endpoint::Tcp(addr) if !addr.ends_with(":0")));

        assert!(server.close());
        tokio::time::timeout(Duration::from_secs(1), server.wait_closed())
            .await
            .unwrap();
        assert!(!server.is_open());
    }
}
