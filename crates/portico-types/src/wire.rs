//! Values and descriptors exchanged at the capability boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged value representation used by direct relational calls.
///
/// Serialized as `{"tag": "<kind>", "val": ...}`. There is deliberately no
/// boolean tag: SQL booleans travel as integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "val", rename_all = "lowercase")]
pub enum WireValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl WireValue {
    /// Lowercase tag name, as it appears on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

/// HTTP methods a guest may register routes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Head,
    Options,
    Patch,
    Delete,
    Put,
    Trace,
    Connect,
}

impl HttpMethod {
    /// Canonical upper-case method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Put => "PUT",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration flags of a relational scalar function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionFlag {
    /// Same inputs always give the same output.
    Deterministic,
    /// Not callable from triggers, views or schema definitions.
    DirectOnly,
    /// Free of side effects, safe to call from schema definitions.
    Innocuous,
    Subtype,
}

/// Scalar function a component offers to the host's relational engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarFunctionDescriptor {
    pub name: String,
    pub num_args: u32,
    #[serde(default)]
    pub flags: Vec<FunctionFlag>,
}

/// Route, schedule and function table a component reports once at
/// initialization.
///
/// The host builds its outer routing and cron tables from this and registers
/// the scalar functions with its relational engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitDescriptor {
    /// `(method, path)` for every HTTP route.
    pub http_handlers: Vec<(HttpMethod, String)>,
    /// `(name, cron_spec)` for every scheduled job.
    pub job_handlers: Vec<(String, String)>,
    #[serde(default)]
    pub scalar_functions: Vec<ScalarFunctionDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_value_json_shape() {
        let json = serde_json::to_value(WireValue::Integer(7)).unwrap();
        assert_eq!(json, serde_json::json!({"tag": "integer", "val": 7}));

        let json = serde_json::to_value(WireValue::Null).unwrap();
        assert_eq!(json, serde_json::json!({"tag": "null"}));

        let json = serde_json::to_value(WireValue::Blob(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({"tag": "blob", "val": [1, 2]}));
    }

    #[test]
    fn wire_value_rejects_boolean_tag() {
        let parsed = serde_json::from_str::<WireValue>(r#"{"tag":"boolean","val":true}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn tag_matches_serialized_tag() {
        for value in [
            WireValue::Null,
            WireValue::Integer(1),
            WireValue::Real(1.5),
            WireValue::Text("a".into()),
            WireValue::Blob(vec![]),
        ] {
            let json = serde_json::to_value(&value).unwrap();
            assert_eq!(json["tag"], value.tag());
        }
    }

    #[test]
    fn method_serde_upper_case() {
        assert_eq!(serde_json::to_string(&HttpMethod::Delete).unwrap(), "\"DELETE\"");
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }

    #[test]
    fn init_descriptor_roundtrip() {
        let desc = InitDescriptor {
            http_handlers: vec![(HttpMethod::Get, "/hello".into())],
            job_handlers: vec![("nightly".into(), "0 0 3 * * *".into())],
            scalar_functions: vec![ScalarFunctionDescriptor {
                name: "slugify".into(),
                num_args: 1,
                flags: vec![FunctionFlag::Deterministic, FunctionFlag::Innocuous],
            }],
        };
        let json = serde_json::to_string(&desc).unwrap();
        let back: InitDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn descriptor_without_functions_still_parses() {
        let desc: InitDescriptor =
            serde_json::from_str(r#"{"http_handlers":[],"job_handlers":[]}"#).unwrap();
        assert!(desc.scalar_functions.is_empty());
        assert_eq!(
            serde_json::to_string(&FunctionFlag::DirectOnly).unwrap(),
            "\"direct_only\""
        );
    }
}
