//! # rpcwire
//!
//! Asynchronous request/response RPC over a single byte stream.
//!
//! A client sends method calls with positional and keyword arguments to a
//! server over TCP or a Unix domain socket. The server looks each method up
//! on a [`Handler`](handler::Handler), runs calls concurrently and sends
//! back either the result or a structured error.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): 6-byte header plus payload, one frame per
//!   message
//! - **Payloads** ([`codec`]): MessagePack by default, JSON for debugging
//! - **Errors** ([`mapper`]): allow-listed faults cross the wire unwrapped,
//!   everything else arrives as [`RpcError::Generic`]
//!
//! ## Example
//!
//! ```no_run
//! use rpcwire::handler::Registry;
//! use rpcwire::{Client, Fault, Kwargs, ServerBuilder};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let mut registry = Registry::new();
//!     registry
//!         .sync("add", |call| {
//!             let (a, b): (i64, i64) = call.args_as()?;
//!             Ok(json!(a + b))
//!         })
//!         .sync("fail", |_| Err(Fault::runtime(vec![json!("nope")])));
//!
//!     let server = ServerBuilder::new(registry)
//!         .bind("tcp://127.0.0.1:9000")
//!         .await?;
//!
//!     let client = Client::builder().connect("tcp://127.0.0.1:9000").await?;
//!     let sum = client.call("add", vec![json!(1), json!(2)], Kwargs::new()).await?;
//!     assert_eq!(sum, json!(3));
//!
//!     client.close();
//!     server.close();
//!     server.wait_closed().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fault;
pub mod handler;
pub mod mapper;
pub mod protocol;
pub mod transport;

mod client;
mod correlator;
mod lifecycle;
mod server;
mod writer;

/// Dynamically typed argument or result value.
pub type Value = serde_json::Value;

/// Keyword arguments of a call.
pub type Kwargs = serde_json::Map<String, Value>;

pub use client::{Client, ClientBuilder, Proxy};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Result, RpcError};
pub use fault::Fault;
pub use handler::{Call, Exposed, Handler, Method, Methods, Registry};
pub use lifecycle::Phase;
pub use mapper::ErrorTable;
pub use server::{Server, ServerBuilder, ServerConnection};
pub use transport::Endpoint;
pub use writer::WriterConfig;
