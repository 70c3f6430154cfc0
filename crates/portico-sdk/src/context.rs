//! Request context resolution.
//!
//! The host routes every invocation before calling the guest and records the
//! outcome in the reserved [`CONTEXT_HEADER`]. Decoding it is the first step
//! of dispatch; a failure here means the invocation cannot be routed.

use http::HeaderMap;
use portico_types::{RequestContext, CONTEXT_HEADER};

use crate::error::{Error, Result};

/// Decode a raw context header value.
///
/// # Errors
///
/// Returns [`Error::MalformedContext`] if `raw` is not a JSON document of the
/// expected shape.
pub fn resolve(raw: &[u8]) -> Result<RequestContext> {
    serde_json::from_slice(raw).map_err(|e| Error::MalformedContext(e.to_string()))
}

/// Locate and decode the context header of an inbound request.
///
/// # Errors
///
/// Returns [`Error::MalformedContext`] if the header is missing, repeated or
/// malformed.
pub fn from_headers(headers: &HeaderMap) -> Result<RequestContext> {
    let mut values = headers.get_all(CONTEXT_HEADER).iter();
    let raw = values
        .next()
        .ok_or_else(|| Error::MalformedContext(format!("missing {CONTEXT_HEADER} header")))?;
    if values.next().is_some() {
        return Err(Error::MalformedContext(format!(
            "{CONTEXT_HEADER} header given more than once"
        )));
    }
    resolve(raw.as_bytes())
}
