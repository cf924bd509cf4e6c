//! End-to-end tests: a client and a server talking over real streams.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rpcwire::codec::{Codec, JsonCodec, MsgPackCodec};
use rpcwire::error::EMPTY_METHOD_NAME;
use rpcwire::handler::{Exposed, Method, Methods, Registry};
use rpcwire::mapper::ArgShape;
use rpcwire::protocol::{build_frame, CallRequest, Header};
use rpcwire::{
    Client, ClientBuilder, ErrorTable, Fault, Kwargs, RpcError, ServerBuilder, ServerConnection,
    Value,
};
use serde_json::json;
use tokio::io::{duplex, AsyncRead, AsyncWrite, ReadBuf};

/// A fault type outside the allow-list.
struct MyException;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .sync("func", |call| Ok(json!(call.arg::<i64>(0)? + 1)))
        .asynchronous("coro", |call| async move {
            let n: i64 = call.arg(0)?;
            tokio::task::yield_now().await;
            Ok(json!(n + 1))
        })
        .sync("exc", |call| {
            Err(Fault::runtime(vec![json!("bad arg"), call.arg::<Value>(0)?]))
        })
        .asynchronous("exc_coro", |call| async move {
            Err(Fault::runtime(vec![json!("bad arg 2"), call.arg::<Value>(0)?]))
        })
        .sync("generic_exception", |_| {
            Err(Fault::of::<MyException>(vec![
                json!("additional"),
                json!("data"),
            ]))
        })
        .sync("kwargs", |call| {
            let greeting: String = call.kwarg("greeting")?;
            let name: Option<String> = call.kwarg_opt("name")?;
            Ok(json!(format!("{}, {}", greeting, name.as_deref().unwrap_or("world"))))
        })
        .asynchronous("sleep", |call| async move {
            let ms: u64 = call.arg(0)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })
        .sync("boom", |_| panic!("handler exploded"));
    registry
}

fn pair_with(server: ServerBuilder, client: ClientBuilder) -> (Client, ServerConnection) {
    let (client_side, server_side) = duplex(64 * 1024);
    let connection = server.serve_stream(server_side).unwrap();
    let client = client.connect_stream(client_side).unwrap();
    (client, connection)
}

fn pair() -> (Client, ServerConnection) {
    pair_with(ServerBuilder::new(registry()), Client::builder())
}

async fn call(client: &Client, method: &str, args: Vec<Value>) -> rpcwire::Result<Value> {
    client.call(method, args, Kwargs::new()).await
}

/// A stream whose writes always fail. Reads yield `inbound` and then
/// never complete, so the read side never sees EOF.
struct BrokenWrites {
    inbound: Vec<u8>,
}

impl AsyncRead for BrokenWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.inbound.is_empty() {
            return Poll::Pending;
        }
        let n = self.inbound.len().min(buf.remaining());
        buf.put_slice(&self.inbound[..n]);
        self.inbound.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_sync_and_async_methods() {
    let (client, _server) = pair();

    assert_eq!(call(&client, "func", vec![json!(1)]).await.unwrap(), json!(2));
    assert_eq!(call(&client, "coro", vec![json!(2)]).await.unwrap(), json!(3));
}

#[tokio::test]
async fn test_allow_listed_fault_passes_through() {
    let (client, _server) = pair();

    let err = call(&client, "exc", vec![json!(1)]).await.unwrap_err();
    match err {
        RpcError::Remote(fault) => {
            assert_eq!(fault, Fault::runtime(vec![json!("bad arg"), json!(1)]));
        }
        other => panic!("expected remote fault, got {other:?}"),
    }

    let err = call(&client, "exc_coro", vec![json!(1)]).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.args(), vec![json!("bad arg 2"), json!(1)]);
}

#[tokio::test]
async fn test_unknown_method() {
    let (client, _server) = pair();

    let err = call(&client, "unknown_method", vec![json!(1), json!(2), json!(3)])
        .await
        .unwrap_err();
    assert!(matches!(&err, RpcError::NotFound(name) if name == "unknown_method"));
    assert_eq!(err.args(), vec![json!("unknown_method")]);
}

#[tokio::test]
async fn test_empty_method_name() {
    let (client, _server) = pair();

    let err = call(&client, "", vec![]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Validation(msg) if msg == EMPTY_METHOD_NAME));

    // Bypassing local validation, the server still refuses the empty name.
    let err = client.call_raw("", vec![], Kwargs::new()).await.unwrap_err();
    assert!(matches!(&err, RpcError::NotFound(name) if name.is_empty()));
}

#[tokio::test]
async fn test_generic_exception() {
    let (client, _server) = pair();

    let err = call(&client, "generic_exception", vec![]).await.unwrap_err();
    match err {
        RpcError::Generic { type_name, args } => {
            assert_eq!(type_name, std::any::type_name::<MyException>());
            assert_eq!(args, vec![json!("additional"), json!("data")]);
        }
        other => panic!("expected generic error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_method_keeps_connection() {
    let (client, _server) = pair();

    let err = call(&client, "boom", vec![]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Generic { type_name, .. } if type_name == "panic"));
    assert_eq!(err.args()[1], json!(["handler exploded"]));

    assert_eq!(call(&client, "func", vec![json!(41)]).await.unwrap(), json!(42));
}

#[tokio::test]
async fn test_keyword_arguments() {
    let (client, _server) = pair();

    let mut kwargs = Kwargs::new();
    kwargs.insert("greeting".into(), json!("hello"));
    let reply = client.call("kwargs", vec![], kwargs.clone()).await.unwrap();
    assert_eq!(reply, json!("hello, world"));

    kwargs.insert("name".into(), json!("rpc"));
    let reply = client.call("kwargs", vec![], kwargs).await.unwrap();
    assert_eq!(reply, json!("hello, rpc"));

    let err = client.call("kwargs", vec![], Kwargs::new()).await.unwrap_err();
    assert!(matches!(&err, RpcError::Remote(fault) if fault.name() == "key"));
}

#[tokio::test]
async fn test_bad_argument_type() {
    let (client, _server) = pair();

    let err = call(&client, "func", vec![json!("one")]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Remote(fault) if fault.name() == "type"));

    let err = call(&client, "func", vec![]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Remote(fault) if fault.name() == "index"));
}

#[tokio::test]
async fn test_concurrent_calls_complete_out_of_order() {
    let (client, _server) = pair();

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { call(&client, "sleep", vec![json!(200)]).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast = tokio::time::timeout(
        Duration::from_millis(150),
        call(&client, "func", vec![json!(1)]),
    )
    .await
    .expect("fast call should not wait for the slow one");
    assert_eq!(fast.unwrap(), json!(2));

    assert_eq!(slow.await.unwrap().unwrap(), json!(200));
}

#[tokio::test]
async fn test_many_concurrent_calls() {
    let (client, _server) = pair();

    let calls: Vec<_> = (0..200i64)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { (n, call(&client, "coro", vec![json!(n)]).await) })
        })
        .collect();

    for handle in calls {
        let (n, result) = handle.await.unwrap();
        assert_eq!(result.unwrap(), json!(n + 1));
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_concurrency_limit() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    registry.asynchronous("work", {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        move |_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }
    });

    let (client, _server) = pair_with(
        ServerBuilder::new(registry).max_concurrent_calls(2),
        Client::builder(),
    );

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { call(&client, "work", vec![]).await })
        })
        .collect();
    for handle in calls {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_call_timeout() {
    let (client, _server) = pair_with(
        ServerBuilder::new(registry()),
        Client::builder().timeout(Duration::from_millis(50)),
    );

    let err = call(&client, "sleep", vec![json!(1000)]).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout(limit) if limit == Duration::from_millis(50)));
    assert_eq!(client.pending_calls(), 0);

    // A proxy deadline overrides the client's.
    let reply = client
        .rpc()
        .timeout(Duration::from_secs(5))
        .call("sleep", vec![json!(100)], Kwargs::new())
        .await
        .unwrap();
    assert_eq!(reply, json!(100));
}

#[tokio::test]
async fn test_close_fails_pending_calls() {
    let (client, _server) = pair();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { call(&client, "sleep", vec![json!(5000)]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_calls(), 1);

    client.close();
    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));

    tokio::time::timeout(Duration::from_secs(1), client.wait_closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_close_fails_client_calls() {
    let (client, server) = pair_with(
        ServerBuilder::new(registry()).drain_timeout(Duration::from_millis(50)),
        Client::builder(),
    );

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { call(&client, "sleep", vec![json!(5000)]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.close();
    tokio::time::timeout(Duration::from_secs(1), server.wait_closed())
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    tokio::time::timeout(Duration::from_secs(1), client.wait_closed())
        .await
        .unwrap();
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_server_close_drains_in_flight_calls() {
    let (client, server) = pair_with(
        ServerBuilder::new(registry()).drain_timeout(Duration::from_secs(2)),
        Client::builder(),
    );

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { call(&client, "sleep", vec![json!(100)]).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    server.close();
    assert_eq!(in_flight.await.unwrap().unwrap(), json!(100));
    server.wait_closed().await;
}

#[tokio::test]
async fn test_write_failure_fails_pending_calls() {
    let client = Client::builder()
        .connect_stream(BrokenWrites { inbound: Vec::new() })
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), call(&client, "func", vec![json!(1)]))
        .await
        .unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));

    tokio::time::timeout(Duration::from_secs(1), client.wait_closed())
        .await
        .unwrap();
    assert!(!client.is_open());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_write_failure_closes_server_connection() {
    let payload = MsgPackCodec
        .encode_call(&CallRequest::new(1, "func", vec![json!(1)], Kwargs::new()))
        .unwrap();
    let stream = BrokenWrites {
        inbound: build_frame(&Header::call(payload.len() as u32), &payload),
    };
    let connection = ServerBuilder::new(registry()).serve_stream(stream).unwrap();

    tokio::time::timeout(Duration::from_secs(2), connection.wait_closed())
        .await
        .unwrap();
    assert!(connection.is_closed());
}

#[tokio::test]
async fn test_namespaces() {
    let mut math = Registry::new();
    math.sync("double", |call| Ok(json!(call.arg::<i64>(0)? * 2)));

    let mut deep = Registry::new();
    deep.sync("answer", |_| Ok(json!(42)));
    math.mount("deep", deep);

    let mut root = registry();
    root.mount("math", math);

    let (client, _server) = pair_with(ServerBuilder::new(root), Client::builder());
    let rpc = client.rpc();

    let reply = rpc
        .ns("math")
        .call("double", vec![json!(21)], Kwargs::new())
        .await
        .unwrap();
    assert_eq!(reply, json!(42));

    let reply = rpc
        .ns("math")
        .ns("deep")
        .call("answer", vec![], Kwargs::new())
        .await
        .unwrap();
    assert_eq!(reply, json!(42));

    let err = rpc
        .ns("math")
        .call("missing", vec![], Kwargs::new())
        .await
        .unwrap_err();
    assert!(matches!(&err, RpcError::NotFound(name) if name == "math.missing"));

    assert_eq!(call(&client, "func", vec![json!(1)]).await.unwrap(), json!(2));
}

#[tokio::test]
async fn test_mapping_handler() {
    let mut methods = HashMap::new();
    methods.insert(
        "add".to_string(),
        Method::typed(|(a, b): (i64, i64)| async move { Ok::<_, Fault>(a + b) }),
    );

    let (client, _server) = pair_with(ServerBuilder::new(methods), Client::builder());
    assert_eq!(
        call(&client, "add", vec![json!(2), json!(3)]).await.unwrap(),
        json!(5)
    );
}

#[derive(Default)]
struct Counter {
    total: AtomicUsize,
}

impl Exposed for Counter {
    fn expose(methods: &mut Methods<Self>) {
        methods
            .sync("add", |this, call| {
                let n: usize = call.arg(0)?;
                Ok(json!(this.total.fetch_add(n, Ordering::SeqCst) + n))
            })
            .asynchronous("total", |this, _| async move {
                Ok(json!(this.total.load(Ordering::SeqCst)))
            });
    }
}

#[tokio::test]
async fn test_exposed_object() {
    let counter = Arc::new(Counter::default());
    let (client, _server) = pair_with(
        ServerBuilder::new(Registry::from_object(Arc::clone(&counter))),
        Client::builder(),
    );

    call(&client, "add", vec![json!(2)]).await.unwrap();
    call(&client, "add", vec![json!(3)]).await.unwrap();
    assert_eq!(call(&client, "total", vec![]).await.unwrap(), json!(5));
    assert_eq!(counter.total.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_json_codec() {
    let (client, _server) = pair_with(
        ServerBuilder::new(registry()).codec(JsonCodec),
        Client::builder().codec(JsonCodec),
    );

    assert_eq!(call(&client, "func", vec![json!(1)]).await.unwrap(), json!(2));
    let err = call(&client, "exc", vec![json!(1)]).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));
}

#[tokio::test]
async fn test_custom_error_table() {
    let table = || {
        ErrorTable::builtin()
            .with_kind("quota", ArgShape::Exactly(1))
            .unwrap()
    };

    let mut registry = Registry::new();
    registry
        .sync("quota", |_| Err(Fault::new("quota", vec![json!(10)])))
        .sync("quota_bad_args", |_| Err(Fault::new("quota", vec![])));

    let (client, _server) = pair_with(
        ServerBuilder::new(registry).error_table(table()),
        Client::builder().error_table(table()),
    );

    let err = call(&client, "quota", vec![]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Remote(fault) if fault.name() == "quota"));

    // Arguments outside the declared shape are wrapped.
    let err = call(&client, "quota_bad_args", vec![]).await.unwrap_err();
    assert!(matches!(&err, RpcError::Generic { type_name, .. } if type_name == "quota"));
}

#[tokio::test]
async fn test_client_drop_closes_server_connection() {
    let (client, server) = pair();
    assert_eq!(call(&client, "func", vec![json!(1)]).await.unwrap(), json!(2));

    drop(client);
    tokio::time::timeout(Duration::from_secs(1), server.wait_closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tcp_server() {
    let server = ServerBuilder::new(registry())
        .bind("tcp://127.0.0.1:0")
        .await
        .unwrap();
    let endpoint = server.local_endpoint().to_string();

    let first = Client::builder().connect(&endpoint).await.unwrap();
    let second = Client::builder().connect(&endpoint).await.unwrap();

    assert_eq!(call(&first, "func", vec![json!(1)]).await.unwrap(), json!(2));
    assert_eq!(call(&second, "coro", vec![json!(2)]).await.unwrap(), json!(3));

    server.close();
    tokio::time::timeout(Duration::from_secs(2), server.wait_closed())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), first.wait_closed())
        .await
        .unwrap();
    assert!(matches!(
        call(&first, "func", vec![json!(1)]).await,
        Err(RpcError::ConnectionClosed)
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_server() {
    let path = std::env::temp_dir().join(format!("rpcwire-rpc-{}.sock", std::process::id()));
    let endpoint = format!("unix://{}", path.display());

    let server = ServerBuilder::new(registry())
        .bind(&endpoint)
        .await
        .unwrap();
    let client = Client::builder().connect(&endpoint).await.unwrap();

    assert_eq!(call(&client, "func", vec![json!(1)]).await.unwrap(), json!(2));

    client.close();
    server.close();
    tokio::time::timeout(Duration::from_secs(2), server.wait_closed())
        .await
        .unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_connect_refused() {
    let server = ServerBuilder::new(registry())
        .bind("tcp://127.0.0.1:0")
        .await
        .unwrap();
    let endpoint = server.local_endpoint().to_string();
    server.close();
    server.wait_closed().await;
    drop(server);

    let result = Client::builder().connect(&endpoint).await;
    assert!(matches!(result, Err(RpcError::Io(_))));
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let result = Client::builder().connect("http://127.0.0.1:1").await;
    assert!(matches!(result, Err(RpcError::Validation(_))));
}
