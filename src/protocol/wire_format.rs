//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌─────────┬───────┬──────────┐
//! │ Version │ Flags │ Length   │
//! │ 1 byte  │ 1 byte│ 4 bytes  │
//! │         │       │ uint32 BE│
//! └─────────┴───────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The header only delimits frames;
//! request ids and method names live in the codec payload.

use crate::error::{Result, RpcError};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = 2_147_483_647;

/// Flag constants for the protocol.
pub mod flags {
    /// Message type: reply (1) or call (0).
    pub const IS_REPLY: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Flags for a call frame.
    pub const CALL: u8 = 0;
    /// Flags for a reply frame.
    pub const REPLY: u8 = IS_REPLY;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a header for the current protocol version.
    pub fn new(flags: u8, payload_length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            payload_length,
        }
    }

    /// Header for a call frame.
    #[inline]
    pub fn call(payload_length: u32) -> Self {
        Self::new(flags::CALL, payload_length)
    }

    /// Header for a reply frame.
    #[inline]
    pub fn reply(payload_length: u32) -> Self {
        Self::new(flags::REPLY, payload_length)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rpcwire::protocol::Header;
    ///
    /// let bytes = Header::reply(100).encode();
    /// assert_eq!(bytes.len(), 6);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use rpcwire::protocol::Header;
    ///
    /// let bytes = [1, 0x01, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert!(header.is_reply());
    /// assert_eq!(header.payload_length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            flags: buf[1],
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Version matches [`PROTOCOL_VERSION`]
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(RpcError::Protocol(format!(
                "Unsupported protocol version {}",
                self.version
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(RpcError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(RpcError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if this is a reply.
    #[inline]
    pub fn is_reply(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_REPLY)
    }

    /// Check if this is a call.
    #[inline]
    pub fn is_call(&self) -> bool {
        !self.is_reply()
    }
}
