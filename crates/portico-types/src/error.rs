//! Error shape returned by every host capability call.

use serde::{Deserialize, Serialize};

/// Failure reported by the host for a capability call.
///
/// Mirrors the variants the component world exposes for its imports. The
/// `Cancelled` variant is what a pending call observes when the host aborts
/// the invocation (for example on timeout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum HostError {
    /// The requested store or bucket does not exist.
    #[error("no such store")]
    NoSuchStore,
    /// The guest lacks the permission for this call.
    #[error("access denied")]
    AccessDenied,
    /// The invocation was cancelled while the call was pending.
    #[error("invocation cancelled")]
    Cancelled,
    /// Any other host-side failure, carrying the host's message.
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Shorthand for [`HostError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_displays_host_message() {
        let err = HostError::other("disk I/O error");
        assert_eq!(err.to_string(), "disk I/O error");
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(HostError::other("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "other", "message": "boom"}));

        let json = serde_json::to_value(HostError::Cancelled).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "cancelled"}));
    }
}
