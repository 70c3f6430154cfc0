//! Value codec.
//!
//! Converts between the guest-native [`Value`], the tagged [`WireValue`]
//! used for direct capability calls, and the JSON envelope used by the
//! loopback relational transport.
//!
//! Booleans are a one-way street: they encode to `Integer(0 | 1)` and no
//! wire or envelope value ever decodes back to [`Value::Boolean`].

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use portico_types::WireValue;

use crate::error::{Error, Result};

/// URL-safe alphabet, unpadded on encode, padding-indifferent on decode.
const URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Key of the single-field object that wraps blobs in the JSON envelope.
const BLOB_KEY: &str = "blob";

/// Scalar value as seen by application code.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload. Booleans read as `0`/`1`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(r) => Some(*r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Self::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        encode(value)
    }
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        decode(wire)
    }
}

/// Encode a value for a direct capability call.
///
/// `Boolean` is coerced to `Integer(0 | 1)`; this is lossy by design of the
/// wire format and not an error.
#[must_use]
pub fn encode(value: Value) -> WireValue {
    match value {
        Value::Null => WireValue::Null,
        Value::Boolean(b) => WireValue::Integer(i64::from(b)),
        Value::Integer(n) => WireValue::Integer(n),
        Value::Real(r) => WireValue::Real(r),
        Value::Text(s) => WireValue::Text(s),
        Value::Bytes(b) => WireValue::Blob(b),
    }
}

/// Decode a wire value. Never yields [`Value::Boolean`].
#[must_use]
pub fn decode(wire: WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Integer(n) => Value::Integer(n),
        WireValue::Real(r) => Value::Real(r),
        WireValue::Text(s) => Value::Text(s),
        WireValue::Blob(b) => Value::Bytes(b),
    }
}

/// Encode a value into the JSON envelope of the loopback transport.
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] for non-finite reals, which JSON cannot
/// represent.
pub fn to_envelope(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::from(i64::from(*b)),
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Real(r) => serde_json::Number::from_f64(*r)
            .map(serde_json::Value::Number)
            .ok_or_else(|| Error::InvalidValue(format!("non-finite real {r}")))?,
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::json!({ BLOB_KEY: url_safe_base64_encode(b) }),
    })
}

/// Decode a JSON envelope value.
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] naming the offending JSON for booleans,
/// arrays, objects other than `{"blob": "<base64>"}`, invalid base64, and
/// integers outside the `i64` range.
pub fn from_envelope(json: serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::String(s) => Ok(Value::Text(s)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if n.is_u64() {
                Err(Error::InvalidValue(format!("integer {n} exceeds the 64-bit signed range")))
            } else {
                n.as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| Error::InvalidValue(format!("unrepresentable number {n}")))
            }
        }
        serde_json::Value::Object(ref map) => match (map.len(), map.get(BLOB_KEY)) {
            (1, Some(serde_json::Value::String(encoded))) => url_safe_base64_decode(encoded)
                .map(Value::Bytes)
                .map_err(|_| Error::InvalidValue(format!("invalid blob encoding in {json}"))),
            _ => Err(Error::InvalidValue(format!("unsupported envelope shape {json}"))),
        },
        other => Err(Error::InvalidValue(format!("unsupported envelope shape {other}"))),
    }
}

/// Standard base64 with padding.
#[must_use]
pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`base64_encode`].
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] if `encoded` is not valid standard base64.
pub fn base64_decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidValue(format!("base64 {encoded:?}: {e}")))
}

/// URL-safe base64 (`-` and `_`), padding stripped.
#[must_use]
pub fn url_safe_base64_encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Inverse of [`url_safe_base64_encode`]. Accepts padded input as well.
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] if `encoded` is not valid URL-safe base64.
pub fn url_safe_base64_decode(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(encoded)
        .map_err(|e| Error::InvalidValue(format!("url-safe base64 {encoded:?}: {e}")))
}
