//! Codec module - serialization of call and reply messages.
//!
//! The framing layer moves opaque payloads; a [`Codec`] turns those payloads
//! into [`CallRequest`]s and [`CallReply`]s and back. Both ends of a
//! connection must agree on the codec.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (default)
//! - [`JsonCodec`] - JSON using `serde_json`, handy for debugging
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::{Codec, MsgPackCodec};
//! use rpcwire::protocol::CallReply;
//! use serde_json::json;
//!
//! let codec = MsgPackCodec;
//! let bytes = codec.encode_reply(&CallReply::success(1, json!("hello"))).unwrap();
//! let reply = codec.decode_reply(&bytes).unwrap();
//! assert!(reply.is_success());
//! ```

mod json;
mod msgpack;

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{CallReply, CallRequest};

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Encodes and decodes protocol messages to frame payloads.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn encode_call(&self, call: &CallRequest) -> Result<Vec<u8>>;

    fn decode_call(&self, bytes: &[u8]) -> Result<CallRequest>;

    fn encode_reply(&self, reply: &CallReply) -> Result<Vec<u8>>;

    fn decode_reply(&self, bytes: &[u8]) -> Result<CallReply>;
}

/// Shared codec handle, as stored by clients and servers.
pub type SharedCodec = Arc<dyn Codec>;

/// Codec used when a builder is not given one.
pub fn default_codec() -> SharedCodec {
    Arc::new(MsgPackCodec)
}
