//! Transport module - socket handling.
//!
//! Provides:
//! - [`Endpoint`] - `tcp://host:port` or (Unix only) `unix:///path`
//! - [`Listener`] - bound server socket
//! - [`Stream`] - connected socket usable as `AsyncRead + AsyncWrite`

mod endpoint;
mod socket;

pub use endpoint::Endpoint;
pub use socket::{Listener, Stream};
