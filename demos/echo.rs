//! Echo server and client in one process.
//!
//! This example demonstrates:
//! - Registering sync, async and typed methods, plus a mounted namespace
//! - Serving them over TCP
//! - Calling them through a client and a namespace proxy
//! - How allow-listed and custom faults reach the caller
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo -- tcp://127.0.0.1:9000
//! ```

use std::time::Duration;

use rpcwire::handler::{Method, Registry};
use rpcwire::{Client, Fault, Kwargs, RpcError, ServerBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Input structure for the typed echo method.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the typed echo method.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

/// A fault the client has no allow-list entry for.
struct Unsupported;

fn handlers() -> Registry {
    let mut text = Registry::new();
    text.sync("upper", |call| {
        let s: String = call.arg(0)?;
        Ok(json!(s.to_uppercase()))
    });

    let mut registry = Registry::new();
    registry
        .register(
            "echo",
            Method::typed(|(input,): (EchoInput,)| async move {
                Ok::<_, Fault>(EchoOutput {
                    echo: input.message,
                })
            }),
        )
        .asynchronous("delayed", |call| async move {
            let ms: u64 = call.kwarg_opt("ms")?.unwrap_or(10);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })
        .sync("divide", |call| {
            let (a, b): (i64, i64) = call.args_as()?;
            if b == 0 {
                return Err(Fault::arithmetic(vec![json!("division by zero")]));
            }
            Ok(json!(a / b))
        })
        .sync("unsupported", |_| Err(Fault::of::<Unsupported>(vec![])))
        .mount("text", text);
    registry
}

#[tokio::main]
async fn main() -> rpcwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:0".to_string());

    let server = ServerBuilder::new(handlers())
        .log_exceptions(true)
        .bind(&endpoint)
        .await?;
    let endpoint = server.local_endpoint().to_string();
    println!("serving on {endpoint}");

    let client = Client::builder()
        .timeout(Duration::from_secs(5))
        .connect(&endpoint)
        .await?;

    let reply = client
        .call("echo", vec![json!({ "message": "hello" })], Kwargs::new())
        .await?;
    println!("echo -> {reply}");

    let mut kwargs = Kwargs::new();
    kwargs.insert("ms".into(), json!(50));
    let reply = client.call("delayed", vec![], kwargs).await?;
    println!("delayed -> {reply}");

    let reply = client
        .rpc()
        .ns("text")
        .call("upper", vec![json!("quiet")], Kwargs::new())
        .await?;
    println!("text.upper -> {reply}");

    match client
        .call("divide", vec![json!(1), json!(0)], Kwargs::new())
        .await
    {
        Err(RpcError::Remote(fault)) => println!("divide -> remote fault {fault}"),
        other => println!("divide -> {other:?}"),
    }

    match client.call("unsupported", vec![], Kwargs::new()).await {
        Err(RpcError::Generic { type_name, .. }) => println!("unsupported -> generic {type_name}"),
        other => println!("unsupported -> {other:?}"),
    }

    client.close();
    client.wait_closed().await;
    server.close();
    server.wait_closed().await;
    Ok(())
}
