//! Call and reply messages.
//!
//! Wire shapes (independent of the codec):
//!
//! ```text
//! call:  [id, method, args, kwargs]
//! reply: [id, "success", value]
//!        [id, "error",   {"not_found": method}]
//!        [id, "error",   {"generic": [type_name, args]}]
//!        [id, "error",   {"<kind>": args}]
//! ```

use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Kwargs, Value};

/// Wire key of the not-found error payload.
pub const NOT_FOUND_KEY: &str = "not_found";
/// Wire key of the generic error payload.
pub const GENERIC_KEY: &str = "generic";

const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// Request identifier, unique among calls pending on one connection.
pub type RequestId = u32;

/// A call to a named remote method.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub id: RequestId,
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl CallRequest {
    pub fn new(id: RequestId, method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            id,
            method: method.into(),
            args,
            kwargs,
        }
    }
}

impl Serialize for CallRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.id, &self.method, &self.args, &self.kwargs).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (id, method, args, kwargs) =
            <(RequestId, String, Vec<Value>, Kwargs)>::deserialize(deserializer)?;
        Ok(Self {
            id,
            method,
            args,
            kwargs,
        })
    }
}

/// Error payload of a failed call.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDescriptor {
    /// No method with this name (possibly empty).
    NotFound { method: String },
    /// Fault outside the allow-list.
    Generic { type_name: String, args: Vec<Value> },
    /// Allow-listed fault kind with its original arguments.
    Passthrough { kind: String, args: Vec<Value> },
}

impl Serialize for ErrorDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            ErrorDescriptor::NotFound { method } => map.serialize_entry(NOT_FOUND_KEY, method)?,
            ErrorDescriptor::Generic { type_name, args } => {
                map.serialize_entry(GENERIC_KEY, &(type_name, args))?
            }
            ErrorDescriptor::Passthrough { kind, args } => map.serialize_entry(kind, args)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ErrorDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DescriptorVisitor;

        impl<'de> Visitor<'de> for DescriptorVisitor {
            type Value = ErrorDescriptor;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry error map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let key: String = map
                    .next_key()?
                    .ok_or_else(|| de::Error::custom("empty error map"))?;
                let descriptor = match key.as_str() {
                    NOT_FOUND_KEY => ErrorDescriptor::NotFound {
                        method: map.next_value()?,
                    },
                    GENERIC_KEY => {
                        let (type_name, args) = map.next_value()?;
                        ErrorDescriptor::Generic { type_name, args }
                    }
                    _ => ErrorDescriptor::Passthrough {
                        args: map.next_value()?,
                        kind: key,
                    },
                };
                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("error map has more than one entry"));
                }
                Ok(descriptor)
            }
        }

        deserializer.deserialize_map(DescriptorVisitor)
    }
}

/// Result of a call as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(ErrorDescriptor),
}

/// Reply to exactly one [`CallRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CallReply {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl CallReply {
    pub fn success(id: RequestId, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(id: RequestId, error: ErrorDescriptor) -> Self {
        Self {
            id,
            outcome: Outcome::Failure(error),
        }
    }

    pub fn not_found(id: RequestId, method: impl Into<String>) -> Self {
        Self::failure(
            id,
            ErrorDescriptor::NotFound {
                method: method.into(),
            },
        )
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

impl Serialize for CallReply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.id)?;
        match &self.outcome {
            Outcome::Success(value) => {
                tuple.serialize_element(STATUS_SUCCESS)?;
                tuple.serialize_element(value)?;
            }
            Outcome::Failure(error) => {
                tuple.serialize_element(STATUS_ERROR)?;
                tuple.serialize_element(error)?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for CallReply {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ReplyVisitor;

        impl<'de> Visitor<'de> for ReplyVisitor {
            type Value = CallReply;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a reply tuple [id, status, payload]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let id: RequestId = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let status: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let outcome = match status.as_str() {
                    STATUS_SUCCESS => Outcome::Success(
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?,
                    ),
                    STATUS_ERROR => Outcome::Failure(
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?,
                    ),
                    other => {
                        return Err(de::Error::unknown_variant(
                            other,
                            &[STATUS_SUCCESS, STATUS_ERROR],
                        ))
                    }
                };
                Ok(CallReply { id, outcome })
            }
        }

        deserializer.deserialize_tuple(3, ReplyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_shape_is_four_tuple() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("verbose".into(), json!(true));
        let call = CallRequest::new(7, "func", vec![json!(1)], kwargs);

        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!([7, "func", [1], {"verbose": true}])
        );
    }

    #[test]
    fn test_reply_success_shape() {
        let reply = CallReply::success(3, json!(2));
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!([3, "success", 2]));
    }

    #[test]
    fn test_error_payload_shapes() {
        let not_found = CallReply::not_found(1, "unknown_method");
        assert_eq!(
            serde_json::to_value(&not_found).unwrap(),
            json!([1, "error", {"not_found": "unknown_method"}])
        );

        let generic = CallReply::failure(
            2,
            ErrorDescriptor::Generic {
                type_name: "app::Boom".into(),
                args: vec![json!("additional"), json!("data")],
            },
        );
        assert_eq!(
            serde_json::to_value(&generic).unwrap(),
            json!([2, "error", {"generic": ["app::Boom", ["additional", "data"]]}])
        );

        let passthrough = CallReply::failure(
            3,
            ErrorDescriptor::Passthrough {
                kind: "runtime".into(),
                args: vec![json!("bad arg"), json!(1)],
            },
        );
        assert_eq!(
            serde_json::to_value(&passthrough).unwrap(),
            json!([3, "error", {"runtime": ["bad arg", 1]}])
        );
    }

    #[test]
    fn test_error_reply_parses_back() {
        let parsed: CallReply =
            serde_json::from_value(json!([9, "error", {"generic": ["x::Y", [1, null]]}])).unwrap();
        assert_eq!(parsed.id, 9);
        assert_eq!(
            parsed.outcome,
            Outcome::Failure(ErrorDescriptor::Generic {
                type_name: "x::Y".into(),
                args: vec![json!(1), json!(null)],
            })
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result: Result<CallReply, _> = serde_json::from_value(json!([1, "maybe", 0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_multi_entry_error_map_rejected() {
        let result: Result<ErrorDescriptor, _> =
            serde_json::from_value(json!({"runtime": [], "value": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_call_missing_field_rejected() {
        let result: Result<CallRequest, _> = serde_json::from_value(json!([1, "func", []]));
        assert!(result.is_err());
    }
}
