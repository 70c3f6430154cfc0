//! Guest-side runtime bridge for Portico components.
//!
//! A component registers HTTP routes, scheduled jobs and relational scalar
//! functions, and [`export_guest!`] wires them to the host's exports.
//! Handlers reach host capabilities through [`db`], [`kv`], [`fetch`] and
//! [`fs`].

#[cfg(target_arch = "wasm32")]
pub mod bindings;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
#[doc(hidden)]
pub mod export;
pub mod fetch;
pub mod fs;
pub mod function;
pub mod host_ffi;
pub mod http;
pub mod job;
pub mod kv;
pub mod logging;
pub mod prelude;
pub mod registry;
pub mod response;
pub mod retry;
#[cfg(not(target_arch = "wasm32"))]
pub mod testing;
pub mod value;

pub use config::GuestConfig;
pub use error::{Error, HttpError, Result};
pub use function::ScalarFunction;
pub use crate::http::{HttpRoute, IntoResponse, Request, Response};
pub use job::Job;
pub use registry::{Guest, Registry};
pub use value::Value;

pub use portico_types;
