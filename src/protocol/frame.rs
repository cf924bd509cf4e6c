//! One decoded frame: header plus payload.
//!
//! ```
//! use bytes::Bytes;
//! use rpcwire::protocol::{Frame, Header};
//!
//! let frame = Frame::new(Header::reply(5), Bytes::from_static(b"hello"));
//! assert!(frame.is_reply());
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A frame as read off the stream. The payload is a slice of the read
/// buffer, not a copy.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Codec payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Carries a [`CallReply`](super::CallReply).
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.header.is_reply()
    }

    /// Carries a [`CallRequest`](super::CallRequest).
    #[inline]
    pub fn is_call(&self) -> bool {
        self.header.is_call()
    }
}

/// Serialize a header and payload into one contiguous buffer.
///
/// The connection writers send header and payload as separate slices; this
/// is for tests and tools that want the bytes in one piece.
///
/// ```
/// use rpcwire::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let bytes = build_frame(&Header::call(5), b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}
