//! Messages for the loopback relational transport.
//!
//! Outside an explicit transaction, guests reach the relational engine by
//! POSTing a [`LoopbackRequest`] to [`LOOPBACK_AUTHORITY`] through the regular
//! outgoing-HTTP capability. Parameters and cells use the JSON envelope
//! (`null | number | string | {"blob": "<url-safe base64>"}`).

use serde::{Deserialize, Serialize};

/// Reserved authority the host intercepts for relational calls.
pub const LOOPBACK_AUTHORITY: &str = "__sqlite";

/// Path for statements returning rows.
pub const QUERY_PATH: &str = "/query";

/// Path for statements returning an affected-row count.
pub const EXECUTE_PATH: &str = "/execute";

/// Request body for both loopback endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackRequest {
    pub query: String,
    pub params: Vec<serde_json::Value>,
}

/// Response body of the loopback endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopbackResponse {
    Query { rows: Vec<Vec<serde_json::Value>> },
    Execute { rows_affected: u64 },
    Error(String),
}
