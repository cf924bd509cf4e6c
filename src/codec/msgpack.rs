//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so that any struct reaching the wire
//! (for example a handler result serialized into a `Value` map) keeps its
//! field names. Call and reply envelopes are tuples and encode as arrays.
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let point = Point { x: 1, y: 2 };
//! let encoded = MsgPackCodec::encode(&point).unwrap();
//! let decoded: Point = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, point);
//! ```

use super::Codec;
use crate::error::Result;
use crate::protocol::{CallReply, CallRequest};

/// MessagePack codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode_call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        Self::encode(call)
    }

    fn decode_call(&self, bytes: &[u8]) -> Result<CallRequest> {
        Self::decode(bytes)
    }

    fn encode_reply(&self, reply: &CallReply) -> Result<Vec<u8>> {
        Self::encode(reply)
    }

    fn decode_reply(&self, bytes: &[u8]) -> Result<CallReply> {
        Self::decode(bytes)
    }
}
