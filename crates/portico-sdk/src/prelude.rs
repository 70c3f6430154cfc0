//! Convenience re-exports for guest authors.
//!
//! ```ignore
//! use portico_sdk::prelude::*;
//! ```

// Registration
pub use crate::function::ScalarFunction;
pub use crate::http::{HttpRoute, IntoResponse, Request, Response};
pub use crate::job::Job;
pub use crate::registry::{Guest, Registry};
pub use crate::GuestConfig;

// Errors
pub use crate::error::{Error, HttpError};

// Capabilities
pub use crate::db::{self, Database, Transaction};
pub use crate::fetch::{fetch_bytes, fetch_json, FetchOptions};
pub use crate::fs::read_file;
pub use crate::kv::{self, Store};
pub use crate::retry::{retry, CancelSignal, RetryPolicy};
pub use crate::value::Value;

pub use http::StatusCode;
pub use portico_types::{FunctionFlag, HttpMethod};
