//! Translation between handler faults and wire error descriptors.
//!
//! The [`ErrorTable`] is the allow-list of fault kinds that cross the wire
//! unwrapped. It is versioned so both ends can tell whether they speak the
//! same vocabulary, and every entry carries the argument shape the kind is
//! expected to have. Anything the table does not accept is wrapped as
//! [`ErrorDescriptor::Generic`] instead of failing to encode.
//!
//! # Example
//!
//! ```
//! use rpcwire::mapper::{ArgShape, ErrorMapper, ErrorTable};
//! use rpcwire::protocol::ErrorDescriptor;
//! use rpcwire::Fault;
//! use serde_json::json;
//!
//! let table = ErrorTable::builtin()
//!     .with_kind("quota", ArgShape::Exactly(1))
//!     .unwrap();
//! let mapper = ErrorMapper::new(table);
//!
//! let descriptor = mapper.encode(Fault::new("quota", vec![json!(10)]));
//! assert!(matches!(descriptor, ErrorDescriptor::Passthrough { .. }));
//! ```

use std::collections::BTreeMap;

use crate::error::{Result, RpcError};
use crate::fault::{kinds, Fault};
use crate::protocol::{ErrorDescriptor, Outcome, GENERIC_KEY, NOT_FOUND_KEY};
use crate::Value;

/// Version of [`ErrorTable::builtin`].
pub const BUILTIN_TABLE_VERSION: u32 = 1;

/// Expected positional arguments of an allow-listed kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// Any number of arguments.
    Any,
    /// Exactly this many arguments.
    Exactly(usize),
    /// At least this many arguments.
    AtLeast(usize),
}

impl ArgShape {
    pub fn accepts(&self, args: &[Value]) -> bool {
        match *self {
            ArgShape::Any => true,
            ArgShape::Exactly(n) => args.len() == n,
            ArgShape::AtLeast(n) => args.len() >= n,
        }
    }
}

/// Versioned allow-list of fault kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTable {
    version: u32,
    entries: BTreeMap<String, ArgShape>,
}

impl ErrorTable {
    /// The canonical kinds from [`crate::fault::kinds`], all with
    /// [`ArgShape::Any`]. Panics are deliberately not listed.
    pub fn builtin() -> Self {
        let entries = [
            kinds::RUNTIME,
            kinds::VALUE,
            kinds::TYPE,
            kinds::KEY,
            kinds::INDEX,
            kinds::ARITHMETIC,
            kinds::NOT_IMPLEMENTED,
            kinds::TIMEOUT,
        ]
        .into_iter()
        .map(|kind| (kind.to_string(), ArgShape::Any))
        .collect();

        Self {
            version: BUILTIN_TABLE_VERSION,
            entries,
        }
    }

    /// A table allowing nothing through; every fault becomes `Generic`.
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace a kind.
    ///
    /// # Errors
    ///
    /// The empty name and the reserved wire keys (`not_found`, `generic`)
    /// are rejected with [`RpcError::Validation`].
    pub fn with_kind(mut self, kind: impl Into<String>, shape: ArgShape) -> Result<Self> {
        let kind = kind.into();
        if kind.is_empty() || kind == NOT_FOUND_KEY || kind == GENERIC_KEY {
            return Err(RpcError::Validation(format!(
                "error kind {:?} is reserved",
                kind
            )));
        }
        self.entries.insert(kind, shape);
        Ok(self)
    }

    /// Set the table version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Whether `kind` is listed and `args` fit its shape.
    pub fn accepts(&self, kind: &str, args: &[Value]) -> bool {
        self.entries
            .get(kind)
            .is_some_and(|shape| shape.accepts(args))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for ErrorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Maps faults to descriptors on the server and descriptors back to
/// [`RpcError`]s on the client.
#[derive(Debug, Clone, Default)]
pub struct ErrorMapper {
    table: ErrorTable,
}

impl ErrorMapper {
    pub fn new(table: ErrorTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ErrorTable {
        &self.table
    }

    /// Package a fault raised by a handler.
    pub fn encode(&self, fault: Fault) -> ErrorDescriptor {
        let (name, args) = fault.into_parts();
        if self.table.accepts(&name, &args) {
            ErrorDescriptor::Passthrough { kind: name, args }
        } else {
            ErrorDescriptor::Generic {
                type_name: name,
                args,
            }
        }
    }

    /// Reconstruct the caller-visible error for a descriptor.
    pub fn decode(&self, descriptor: ErrorDescriptor) -> RpcError {
        match descriptor {
            ErrorDescriptor::NotFound { method } => RpcError::NotFound(method),
            ErrorDescriptor::Generic { type_name, args } => RpcError::Generic { type_name, args },
            ErrorDescriptor::Passthrough { kind, args } => {
                if self.table.contains(&kind) {
                    RpcError::Remote(Fault::new(kind, args))
                } else {
                    RpcError::Generic {
                        type_name: kind,
                        args,
                    }
                }
            }
        }
    }

    /// Turn a reply outcome into the result of the call.
    pub fn decode_outcome(&self, outcome: Outcome) -> Result<Value> {
        match outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(descriptor) => Err(self.decode(descriptor)),
        }
    }
}
