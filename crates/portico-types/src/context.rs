//! Per-invocation routing metadata injected by the host.

use serde::{Deserialize, Serialize};

/// Reserved request header carrying the JSON-encoded [`RequestContext`].
pub const CONTEXT_HEADER: &str = "__context";

/// What triggered the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// An HTTP request routed to a registered path.
    Http,
    /// A scheduled job trigger.
    Job,
}

/// Authenticated user forwarded by the host, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUser {
    pub id: String,
    pub email: String,
    pub csrf_token: String,
}

/// Routing metadata for a single invocation.
///
/// Built once from [`CONTEXT_HEADER`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub kind: ContextKind,
    /// Route pattern (HTTP) or job name (Job) the host resolved.
    pub registered_path: String,
    /// Path parameters in the order the host extracted them.
    #[serde(default)]
    pub path_params: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ContextUser>,
}

impl RequestContext {
    /// First path parameter named `key`.
    #[must_use]
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
