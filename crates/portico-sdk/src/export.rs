//! Glue between the component exports and the [`Registry`].
//!
//! [`export_guest!`](crate::export_guest) expands to a thin shim over
//! [`initialize`] and [`invoke`], which keeps this logic testable natively.

use std::sync::OnceLock;

use portico_types::{InitDescriptor, WireValue};

use crate::config::GuestConfig;
use crate::error::{Error, Result};
use crate::http::IncomingRequest;
use crate::logging;
use crate::registry::{Guest, Registry};
use crate::response::{self, ResponseOutparam};

/// Handle the init export: parse config, set up logging, build the registry.
///
/// Repeated calls return the descriptor of the registry built first.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidConfig`] for malformed arguments and
/// [`crate::Error::DuplicateHandler`] for conflicting registrations.
#[doc(hidden)]
pub fn initialize<G: Guest>(cell: &OnceLock<Registry>, args: &str) -> Result<InitDescriptor> {
    if let Some(registry) = cell.get() {
        return Ok(registry.init_descriptor());
    }

    let config = GuestConfig::parse(args)?;
    logging::init(&config.log_level);
    G::init(&config);

    let registry = Registry::from_guest::<G>()?;
    let descriptor = registry.init_descriptor();
    tracing::debug!(
        version = config.version.as_deref().unwrap_or("unknown"),
        routes = descriptor.http_handlers.len(),
        jobs = descriptor.job_handlers.len(),
        "guest initialized"
    );
    let _ = cell.set(registry);
    Ok(descriptor)
}

/// Handle the invocation export on a fresh current-thread runtime.
#[doc(hidden)]
pub fn invoke<O: ResponseOutparam>(
    cell: &OnceLock<Registry>,
    request: IncomingRequest,
    outparam: O,
) {
    let Some(registry) = cell.get() else {
        tracing::error!("invocation before initialization");
        fail(outparam, "component not initialized");
        return;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to build guest runtime");
            fail(outparam, &format!("failed to build guest runtime: {err}"));
            return;
        }
    };
    runtime.block_on(registry.dispatch(request, outparam));
}

/// Handle the scalar function export.
///
/// # Errors
///
/// Returns [`Error::Function`] before initialization, otherwise see
/// [`Registry::call_function`].
#[doc(hidden)]
pub fn call_function(
    cell: &OnceLock<Registry>,
    name: &str,
    args: Vec<WireValue>,
) -> Result<WireValue> {
    let Some(registry) = cell.get() else {
        tracing::error!(function = name, "function call before initialization");
        return Err(Error::Function(format!("{name}: component not initialized")));
    };
    registry.call_function(name, args)
}

fn fail<O: ResponseOutparam>(outparam: O, message: &str) {
    if let Err(err) = response::write(outparam, 500, message.as_bytes()) {
        tracing::error!(error = %err, "failed to write response");
    }
}

/// Export a [`Guest`] implementation as the component's entry points.
///
/// Expands to nothing off `wasm32`. The registry lives in a once-initialised
/// cell local to the expansion.
///
/// ```ignore
/// struct Blog;
///
/// impl portico_sdk::Guest for Blog {
///     fn http_handlers() -> Vec<portico_sdk::HttpRoute> {
///         vec![portico_sdk::HttpRoute::get("/posts", |_req| async { Ok("[]") })]
///     }
/// }
///
/// portico_sdk::export_guest!(Blog);
/// ```
#[macro_export]
macro_rules! export_guest {
    ($guest:ty) => {
        #[cfg(target_arch = "wasm32")]
        mod __portico_guest_export {
            use super::*;

            static REGISTRY: ::std::sync::OnceLock<$crate::Registry> =
                ::std::sync::OnceLock::new();

            struct Component;

            impl $crate::bindings::exports::portico::guest::runtime::Guest for Component {
                fn init(
                    args: ::std::string::String,
                ) -> ::std::result::Result<
                    $crate::bindings::exports::portico::guest::runtime::InitDescriptor,
                    ::std::string::String,
                > {
                    $crate::bindings::init::<$guest>(&REGISTRY, &args)
                }

                fn handle(
                    request: $crate::bindings::portico::guest::types::IncomingRequest,
                    outparam: $crate::bindings::portico::guest::types::ResponseOutparam,
                ) {
                    $crate::bindings::handle(&REGISTRY, request, outparam);
                }

                fn call_function(
                    name: ::std::string::String,
                    args: ::std::vec::Vec<$crate::bindings::portico::guest::types::Value>,
                ) -> ::std::result::Result<
                    $crate::bindings::portico::guest::types::Value,
                    ::std::string::String,
                > {
                    $crate::bindings::call_function(&REGISTRY, &name, args)
                }
            }

            $crate::__export_portico_world!(Component with_types_in $crate::bindings);
        }
    };
}
