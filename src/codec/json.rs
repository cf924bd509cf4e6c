//! JSON codec using `serde_json`.

use super::Codec;
use crate::error::Result;
use crate::protocol::{CallReply, CallRequest};

/// JSON codec. Payloads are compact UTF-8 JSON arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(call)?)
    }

    fn decode_call(&self, bytes: &[u8]) -> Result<CallRequest> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode_reply(&self, reply: &CallReply) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(reply)?)
    }

    fn decode_reply(&self, bytes: &[u8]) -> Result<CallReply> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
