//! Faults raised by remotely callable methods.
//!
//! A [`Fault`] is a named error carrying positional arguments as plain data.
//! The name either is one of the canonical [`kinds`] (which the default
//! [`ErrorTable`](crate::mapper::ErrorTable) lets cross the wire unchanged)
//! or a qualified Rust type name, which reaches the caller wrapped as
//! [`RpcError::Generic`](crate::RpcError::Generic).
//!
//! # Example
//!
//! ```
//! use rpcwire::Fault;
//! use serde_json::json;
//!
//! struct QuotaExceeded;
//!
//! let fault = Fault::runtime(vec![json!("bad arg"), json!(1)]);
//! assert_eq!(fault.name(), "runtime");
//!
//! let custom = Fault::of::<QuotaExceeded>(vec![json!("additional")]);
//! assert!(custom.name().ends_with("QuotaExceeded"));
//! ```

use std::borrow::Cow;
use std::fmt;

use crate::Value;

/// Canonical fault kinds.
pub mod kinds {
    /// Generic failure at run time.
    pub const RUNTIME: &str = "runtime";
    /// Argument had the right type but an unacceptable value.
    pub const VALUE: &str = "value";
    /// Argument had the wrong type.
    pub const TYPE: &str = "type";
    /// Mapping key missing.
    pub const KEY: &str = "key";
    /// Sequence index out of range.
    pub const INDEX: &str = "index";
    /// Arithmetic failure (overflow, division by zero).
    pub const ARITHMETIC: &str = "arithmetic";
    /// Operation not implemented.
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    /// Operation timed out inside the handler.
    pub const TIMEOUT: &str = "timeout";

    /// Name used for handler panics caught by the dispatcher.
    pub const PANIC: &str = "panic";
}

/// An error raised by a method, identified by name and carrying its
/// positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    name: Cow<'static, str>,
    args: Vec<Value>,
}

impl Fault {
    /// Create a fault with an explicit name.
    pub fn new(name: impl Into<Cow<'static, str>>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Create a fault named after the type `E` (`module::path::Type`).
    pub fn of<E: ?Sized>(args: Vec<Value>) -> Self {
        Self::new(std::any::type_name::<E>(), args)
    }

    /// Wrap any error value; its display text becomes the sole argument.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(
            std::any::type_name::<E>(),
            vec![Value::from(err.to_string())],
        )
    }

    /// A [`kinds::RUNTIME`] fault: a generic failure at run time.
    pub fn runtime(args: Vec<Value>) -> Self {
        Self::new(kinds::RUNTIME, args)
    }

    /// A [`kinds::VALUE`] fault: an argument of the right type with a bad value.
    pub fn value(args: Vec<Value>) -> Self {
        Self::new(kinds::VALUE, args)
    }

    /// A [`kinds::TYPE`] fault: an argument of the wrong type.
    pub fn type_error(args: Vec<Value>) -> Self {
        Self::new(kinds::TYPE, args)
    }

    /// A [`kinds::KEY`] fault: a missing mapping key.
    pub fn key(args: Vec<Value>) -> Self {
        Self::new(kinds::KEY, args)
    }

    /// A [`kinds::INDEX`] fault: a sequence index out of range.
    pub fn index(args: Vec<Value>) -> Self {
        Self::new(kinds::INDEX, args)
    }

    /// A [`kinds::ARITHMETIC`] fault, e.g. overflow or division by zero.
    pub fn arithmetic(args: Vec<Value>) -> Self {
        Self::new(kinds::ARITHMETIC, args)
    }

    /// A [`kinds::NOT_IMPLEMENTED`] fault.
    pub fn not_implemented(args: Vec<Value>) -> Self {
        Self::new(kinds::NOT_IMPLEMENTED, args)
    }

    /// A [`kinds::TIMEOUT`] fault: an operation inside the handler timed out.
    pub fn timeout(args: Vec<Value>) -> Self {
        Self::new(kinds::TIMEOUT, args)
    }

    /// Kind or qualified type name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Positional arguments.
    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Split into name and arguments.
    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.name.into_owned(), self.args)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

impl std::error::Error for Fault {}
