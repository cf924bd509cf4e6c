//! Error types for rpcwire.

use std::time::Duration;

use thiserror::Error;

use crate::fault::Fault;
use crate::Value;

/// Message carried by [`RpcError::Validation`] when a call names no method.
pub const EMPTY_METHOD_NAME: &str = "RPC method name is empty";

/// Main error type for all rpcwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, malformed message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The call was rejected locally before anything was sent.
    #[error("Invalid call: {0}")]
    Validation(String),

    /// The remote handler has no method with this name.
    #[error("Method not found: {0:?}")]
    NotFound(String),

    /// The remote handler raised an allow-listed fault.
    ///
    /// The fault compares equal to one constructed locally with the same
    /// kind and arguments.
    #[error("Remote fault: {0}")]
    Remote(Fault),

    /// The remote handler raised a fault outside the allow-list.
    #[error("Remote error {type_name}: {args:?}")]
    Generic {
        /// Qualified type name of the remote fault.
        type_name: String,
        /// Original arguments of the remote fault.
        args: Vec<Value>,
    },

    /// Connection closed before the call could complete.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No reply arrived within the call deadline.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RpcError {
    /// Positional arguments of the error as seen by a caller.
    ///
    /// `NotFound` yields the method name, `Validation` its message,
    /// `Remote` the fault arguments and `Generic` the pair
    /// `(type_name, args)`. Transport-level errors yield their display text.
    pub fn args(&self) -> Vec<Value> {
        match self {
            RpcError::NotFound(method) => vec![Value::from(method.as_str())],
            RpcError::Validation(message) => vec![Value::from(message.as_str())],
            RpcError::Remote(fault) => fault.args().to_vec(),
            RpcError::Generic { type_name, args } => vec![
                Value::from(type_name.as_str()),
                Value::Array(args.clone()),
            ],
            other => vec![Value::from(other.to_string())],
        }
    }

    /// Whether this error came back from the remote side of the call.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RpcError::NotFound(_) | RpcError::Remote(_) | RpcError::Generic { .. }
        )
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
