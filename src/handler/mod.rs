//! Handler module - method resolution and invocation.
//!
//! Provides:
//! - [`Handler`] - resolves a method name to a [`Method`]
//! - [`Registry`] - explicit name table with mounted namespaces
//! - [`Exposed`] - objects that list their callable methods once
//! - [`Method`] / [`Call`] - uniform invocation of sync and async functions

mod method;
mod registry;

pub use method::{BoxFuture, Call, Method, MethodResult};
pub use registry::{Exposed, Handler, Methods, Registry, NAMESPACE_SEPARATOR};
