//! Reassembles frames from arbitrarily split reads.
//!
//! Reads land in a `BytesMut`; complete frames are split off the front
//! without copying. Parsing alternates between two states: waiting for a
//! full header, then waiting for the payload length it announced.
//!
//! # Example
//!
//! ```
//! use rpcwire::protocol::{build_frame, FrameBuffer, Header};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(&Header::call(2), b"hi");
//!
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Initial capacity of the reassembly buffer.
const INITIAL_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    /// Header consumed; its payload is not complete yet.
    Payload(Header),
}

/// Frame reassembly for one inbound stream.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Buffer accepting payloads up to [`DEFAULT_MAX_PAYLOAD_SIZE`].
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::Header,
            max_payload_size,
        }
    }

    /// Append `data` and return every frame it completes, in stream order.
    ///
    /// # Errors
    ///
    /// [`RpcError::Protocol`](crate::RpcError::Protocol) when a header is
    /// invalid (unknown version, reserved flags, payload over the limit).
    /// The stream has lost sync at that point and must be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header = match self.state {
            State::Payload(header) => header,
            State::Header => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };
                header.validate(self.max_payload_size)?;
                self.buffer.advance(HEADER_SIZE);
                self.state = State::Payload(header);
                header
            }
        };

        let len = header.payload_length as usize;
        if self.buffer.len() < len {
            return Ok(None);
        }

        self.state = State::Header;
        Ok(Some(Frame::new(header, self.buffer.split_to(len).freeze())))
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered bytes and any half-read frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Header;
    }

    #[cfg(test)]
    fn mid_frame(&self) -> bool {
        matches!(self.state, State::Payload(_))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
