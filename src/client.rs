//! Client builder, client and namespace proxy.
//!
//! The [`ClientBuilder`] configures the connection and builds a [`Client`].
//! A client multiplexes any number of concurrent calls over one stream:
//! 1. Register a pending call and allocate its id
//! 2. Encode the call and queue it on the writer task
//! 3. The read loop matches replies to pending calls by id
//!
//! # Example
//!
//! ```no_run
//! use rpcwire::{Client, Kwargs};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let client = Client::builder().connect("tcp://127.0.0.1:9000").await?;
//!
//!     let two = client.call("func", vec![json!(1)], Kwargs::new()).await?;
//!     assert_eq!(two, json!(2));
//!
//!     client.close();
//!     client.wait_closed().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::runtime::Handle;

use crate::codec::{default_codec, Codec, SharedCodec};
use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::{Result, RpcError, EMPTY_METHOD_NAME};
use crate::handler::NAMESPACE_SEPARATOR;
use crate::lifecycle::{resolve_runtime, Lifecycle, Phase};
use crate::mapper::{ErrorMapper, ErrorTable};
use crate::protocol::{CallRequest, Frame, FrameBuffer};
use crate::transport::{Endpoint, Stream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle, WriterTask};
use crate::{Kwargs, Value};

/// Size of the buffer each read fills.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    error_table: ErrorTable,
    codec: SharedCodec,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            error_table: ErrorTable::builtin(),
            codec: default_codec(),
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Deadline for every call made through this client.
    ///
    /// Default: none
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Largest reply payload accepted.
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

    /// Allow-list used to rebuild remote faults. Must match the server's.
    pub fn error_table(mut self, table: ErrorTable) -> Self {
        self.error_table = table;
        self
    }

    /// Payload codec. Must match the server's.
    ///
    /// Default: [`MsgPackCodec`](crate::codec::MsgPackCodec)
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Runtime the connection tasks are spawned on.
    ///
    /// Default: the runtime current when connecting.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Connect to `endpoint` (`tcp://host:port` or `unix:///path`).
    pub async fn connect(self, endpoint: &str) -> Result<Client> {
        let endpoint: Endpoint = endpoint.parse()?;
        self.connect_endpoint(&endpoint).await
    }

    pub async fn connect_endpoint(self, endpoint: &Endpoint) -> Result<Client> {
        let stream = Stream::connect(endpoint).await?;
        tracing::debug!(%endpoint, "Connected");
        self.connect_stream(stream)
    }

    /// Run the client over an already connected stream.
    pub fn connect_stream<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let runtime = resolve_runtime(self.runtime)?;
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(&runtime, write_half, &self.config.writer);

        let shared = Arc::new(Shared {
            correlator: Arc::new(Correlator::new()),
            mapper: ErrorMapper::new(self.error_table),
            codec: self.codec,
            lifecycle: Lifecycle::new(),
            writer: Mutex::new(Some(writer)),
            timeout: self.config.timeout,
            drain_timeout: self.config.writer.backpressure_timeout,
        });

        runtime.spawn(run_connection(
            reader,
            Arc::clone(&shared),
            writer_task,
            self.config.max_payload_size,
        ));

        Ok(Client {
            inner: Arc::new(ClientInner { shared }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by client handles and the read loop.
struct Shared {
    correlator: Arc<Correlator>,
    mapper: ErrorMapper,
    codec: SharedCodec,
    lifecycle: Lifecycle,
    /// Taken on close so the writer task can finish.
    writer: Mutex<Option<WriterHandle>>,
    timeout: Option<Duration>,
    drain_timeout: Duration,
}

impl Shared {
    fn writer(&self) -> Result<WriterHandle> {
        if !self.lifecycle.is_open() {
            return Err(RpcError::ConnectionClosed);
        }
        self.writer.lock().clone().ok_or(RpcError::ConnectionClosed)
    }

    async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let writer = self.writer()?;
        let pending = self.correlator.register()?;
        let id = pending.id();

        let request = CallRequest::new(id, method, args, kwargs);
        let payload = self.codec.encode_call(&request)?;
        writer.send(OutboundFrame::call(Bytes::from(payload))?).await?;
        drop(writer);

        tracing::trace!(id, method, "Call sent");

        match timeout {
            None => pending.wait().await,
            Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(id, method, "Call timed out after {:?}", limit);
                    Err(RpcError::Timeout(limit))
                }
            },
        }
    }

    /// Stop new calls, fail pending ones and release the writer.
    fn begin_close(&self) -> bool {
        if !self.lifecycle.close() {
            return false;
        }
        let failed = self.correlator.fail_all();
        self.writer.lock().take();
        tracing::debug!(failed, "Client closing");
        true
    }

    fn handle_frame(&self, frame: Frame) {
        if frame.is_call() {
            tracing::warn!("Unexpected call frame on client connection, ignored");
            return;
        }

        let reply = match self.codec.decode_reply(frame.payload()) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Undecodable reply dropped: {}", e);
                return;
            }
        };

        let id = reply.id;
        let result = self.mapper.decode_outcome(reply.outcome);
        if !self.correlator.resolve(id, result) {
            tracing::warn!(id, "Reply for unknown request id dropped");
        }
    }
}

async fn run_connection<R>(
    reader: R,
    shared: Arc<Shared>,
    mut writer_task: WriterTask,
    max_payload_size: u32,
) where
    R: AsyncRead + Unpin,
{
    match read_loop(reader, &shared, &mut writer_task, max_payload_size).await {
        Ok(()) => tracing::debug!("Client read loop finished"),
        Err(e) => tracing::error!("Client read loop error: {}", e),
    }

    shared.begin_close();
    writer_task.drain(shared.drain_timeout).await;
    shared.lifecycle.mark_closed();
}

/// Read frames and resolve pending calls until EOF, close, or the writer
/// stopping.
async fn read_loop<R>(
    mut reader: R,
    shared: &Shared,
    writer_task: &mut WriterTask,
    max_payload_size: u32,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            _ = shared.lifecycle.closing() => return Ok(()),
            exited = writer_task.exited() => return exited,
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            shared.handle_frame(frame);
        }
    }
}

/// Closes the connection when the last [`Client`] clone is dropped.
struct ClientInner {
    shared: Arc<Shared>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shared.begin_close();
    }
}

/// A connected client. Clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Call `method` and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Validation`] if `method` is empty (nothing is sent)
    /// - [`RpcError::NotFound`], [`RpcError::Remote`], [`RpcError::Generic`]
    ///   when the remote side fails the call
    /// - [`RpcError::ConnectionClosed`] if the connection goes away first
    /// - [`RpcError::Timeout`] if a deadline is configured and expires
    pub async fn call(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        if method.is_empty() {
            return Err(RpcError::Validation(EMPTY_METHOD_NAME.to_string()));
        }
        self.call_raw(method, args, kwargs).await
    }

    /// Send a call without validating the method name.
    pub async fn call_raw(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let shared = self.shared();
        shared.invoke(method, args, kwargs, shared.timeout).await
    }

    /// Proxy for composing namespaced calls.
    pub fn rpc(&self) -> Proxy {
        Proxy {
            client: self.clone(),
            prefix: String::new(),
            timeout: None,
        }
    }

    /// Stop issuing calls and close the connection.
    ///
    /// Pending calls fail with [`RpcError::ConnectionClosed`]; frames
    /// already queued are still written. Returns `false` if the client was
    /// already closing.
    pub fn close(&self) -> bool {
        self.shared().begin_close()
    }

    /// Wait until the connection has released its stream.
    pub async fn wait_closed(&self) {
        self.shared().lifecycle.wait_closed().await;
    }

    pub fn is_open(&self) -> bool {
        self.shared().lifecycle.is_open()
    }

    pub fn phase(&self) -> Phase {
        self.shared().lifecycle.phase()
    }

    /// Calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared().correlator.pending_count()
    }

    /// Version of the allow-list this client rebuilds faults with.
    pub fn error_table_version(&self) -> u32 {
        self.shared().mapper.table().version()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared();
        f.debug_struct("Client")
            .field("codec", &shared.codec.name())
            .field("phase", &shared.lifecycle.phase())
            .field("pending", &shared.correlator.pending_count())
            .finish()
    }
}

/// Builds dotted method names, e.g. `client.rpc().ns("sub").call("method", ..)`
/// calls `"sub.method"`.
#[derive(Clone)]
pub struct Proxy {
    client: Client,
    prefix: String,
    timeout: Option<Duration>,
}

impl Proxy {
    /// Descend into namespace `name`.
    pub fn ns(&self, name: &str) -> Proxy {
        Proxy {
            client: self.client.clone(),
            prefix: self.qualify(name),
            timeout: self.timeout,
        }
    }

    /// Deadline for calls through this proxy, overriding the client's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Namespace prefix, empty at the root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Call `method` inside this namespace.
    pub async fn call(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        if method.is_empty() {
            return Err(RpcError::Validation(EMPTY_METHOD_NAME.to_string()));
        }
        let shared = self.client.shared();
        let timeout = self.timeout.or(shared.timeout);
        shared
            .invoke(&self.qualify(method), args, kwargs, timeout)
            .await
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", self.prefix, NAMESPACE_SEPARATOR, name)
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}
