//! Protocol module - wire format, framing, and call/reply messages.
//!
//! This module implements the binary protocol carried by a connection:
//! - 6-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - Call and reply message shapes encoded by a [`Codec`](crate::codec::Codec)

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{
    CallReply, CallRequest, ErrorDescriptor, Outcome, RequestId, GENERIC_KEY, NOT_FOUND_KEY,
};
pub use wire_format::{
    flags, Header, ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
    PROTOCOL_VERSION,
};
