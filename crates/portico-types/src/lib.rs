//! Shared Portico boundary types.
//!
//! Everything in this crate crosses the host/guest capability boundary in
//! one form or another, so it stays free of runtime dependencies and is safe
//! to use from both the host process and guest components.

pub mod context;
pub mod error;
pub mod loopback;
pub mod wire;

pub use context::{ContextKind, ContextUser, RequestContext, CONTEXT_HEADER};
pub use error::HostError;
pub use loopback::{LoopbackRequest, LoopbackResponse, LOOPBACK_AUTHORITY};
pub use wire::{FunctionFlag, HttpMethod, InitDescriptor, ScalarFunctionDescriptor, WireValue};
