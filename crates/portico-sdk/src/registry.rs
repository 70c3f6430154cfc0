//! Handler registry and dispatcher.
//!
//! A [`Registry`] is built once at component initialization and only read
//! afterwards. [`Registry::dispatch`] is the single recovery boundary of an
//! invocation: every failure, panics included, becomes a response.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use http::{Method, StatusCode};
use portico_types::{ContextKind, HttpMethod, InitDescriptor, RequestContext, WireValue};

use crate::config::GuestConfig;
use crate::context;
use crate::error::{Error, HttpError, Result};
use crate::function::ScalarFunction;
use crate::http::{route_method, HttpRoute, IncomingRequest, Request, Response};
use crate::job::Job;
use crate::response::{self, ResponseOutparam};

/// What a guest component provides.
pub trait Guest {
    /// Called once before the handler tables are read.
    fn init(_config: &GuestConfig) {}

    fn http_handlers() -> Vec<HttpRoute>;

    fn job_handlers() -> Vec<Job> {
        Vec::new()
    }

    fn scalar_functions() -> Vec<ScalarFunction> {
        Vec::new()
    }
}

/// Immutable route, job and scalar function tables.
pub struct Registry {
    routes: Vec<HttpRoute>,
    route_index: HashMap<(HttpMethod, String), usize>,
    jobs: Vec<Job>,
    job_index: HashMap<String, usize>,
    functions: Vec<ScalarFunction>,
    function_index: HashMap<String, usize>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("routes", &self.routes)
            .field("jobs", &self.jobs)
            .field("functions", &self.functions)
            .finish()
    }
}

impl Registry {
    /// Build the tables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if two routes share a method and
    /// path, or two jobs share a name.
    pub fn new(routes: Vec<HttpRoute>, jobs: Vec<Job>) -> Result<Self> {
        let mut route_index = HashMap::with_capacity(routes.len());
        for (i, route) in routes.iter().enumerate() {
            if route_index
                .insert((route.method, route.path.clone()), i)
                .is_some()
            {
                return Err(Error::DuplicateHandler(format!(
                    "{} {}",
                    route.method, route.path
                )));
            }
        }

        let mut job_index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if job_index.insert(job.name.clone(), i).is_some() {
                return Err(Error::DuplicateHandler(format!("job {}", job.name)));
            }
        }

        Ok(Self {
            routes,
            route_index,
            jobs,
            job_index,
            functions: Vec::new(),
            function_index: HashMap::new(),
        })
    }

    /// Add the scalar function table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if two functions share a name.
    pub fn with_functions(mut self, functions: Vec<ScalarFunction>) -> Result<Self> {
        let mut function_index = HashMap::with_capacity(functions.len());
        for (i, function) in functions.iter().enumerate() {
            if function_index.insert(function.name.clone(), i).is_some() {
                return Err(Error::DuplicateHandler(format!("function {}", function.name)));
            }
        }
        self.functions = functions;
        self.function_index = function_index;
        Ok(self)
    }

    /// Build the tables from a [`Guest`] implementation.
    ///
    /// # Errors
    ///
    /// See [`Registry::new`] and [`Registry::with_functions`].
    pub fn from_guest<G: Guest>() -> Result<Self> {
        Self::new(G::http_handlers(), G::job_handlers())?.with_functions(G::scalar_functions())
    }

    /// Route and schedule table for the host, in registration order.
    #[must_use]
    pub fn init_descriptor(&self) -> InitDescriptor {
        InitDescriptor {
            http_handlers: self
                .routes
                .iter()
                .map(|r| (r.method, r.path.clone()))
                .collect(),
            job_handlers: self
                .jobs
                .iter()
                .map(|j| (j.name.clone(), j.spec.clone()))
                .collect(),
            scalar_functions: self
                .functions
                .iter()
                .map(ScalarFunction::descriptor)
                .collect(),
        }
    }

    #[must_use]
    pub fn route(&self, method: HttpMethod, path: &str) -> Option<&HttpRoute> {
        self.route_index
            .get(&(method, path.to_string()))
            .map(|&i| &self.routes[i])
    }

    #[must_use]
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.job_index.get(name).map(|&i| &self.jobs[i])
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&ScalarFunction> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    /// Evaluate the scalar function `name` for the relational engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for an unknown name,
    /// [`Error::InvalidValue`] on an arity mismatch and [`Error::Function`]
    /// if the function fails or panics.
    pub fn call_function(&self, name: &str, args: Vec<WireValue>) -> Result<WireValue> {
        let function = self
            .function(name)
            .ok_or_else(|| Error::HandlerNotFound(format!("function {name}")))?;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| function.call(args)))
            .unwrap_or_else(|payload| {
                Err(Error::Function(format!(
                    "{name} panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        if let Err(err) = &result {
            tracing::warn!(function = name, error = %err, "scalar function failed");
        }
        result
    }

    /// Handle one invocation and commit the response to `outparam`.
    ///
    /// Never fails: handler errors are already responses, and a failure to
    /// write the response is logged.
    pub async fn dispatch<O: ResponseOutparam>(&self, request: IncomingRequest, outparam: O) {
        let response = self.handle(request).await;
        if let Err(err) = response::write_response(outparam, &response) {
            tracing::error!(
                error = %err,
                status = response.status.as_u16(),
                "failed to write response"
            );
        }
    }

    /// Resolve, route and run one invocation, returning the response to emit.
    pub async fn handle(&self, request: IncomingRequest) -> Response {
        let context = match context::from_headers(&request.headers) {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(error = %err, "cannot route invocation");
                return Response::new(err.status()).with_body(err.to_string());
            }
        };
        tracing::debug!(
            kind = ?context.kind,
            registered_path = %context.registered_path,
            "dispatching"
        );

        let outcome = match context.kind {
            ContextKind::Job => self.run_job(&request.method, &context.registered_path).await,
            ContextKind::Http => self.run_http(request, context).await,
        };
        outcome.unwrap_or_else(|err| error_response(&err))
    }

    /// Jobs are only triggered with `GET`; any other method finds nothing.
    async fn run_job(&self, method: &Method, name: &str) -> anyhow::Result<Response> {
        let job = self
            .job(name)
            .filter(|_| *method == Method::GET)
            .ok_or_else(|| Error::HandlerNotFound(format!("job {name} ({method})")))?;
        guarded(|| job.call()).await?;
        Ok(Response::new(StatusCode::OK))
    }

    async fn run_http(
        &self,
        request: IncomingRequest,
        context: RequestContext,
    ) -> anyhow::Result<Response> {
        let route = route_method(&request.method)
            .and_then(|method| self.route(method, &context.registered_path))
            .ok_or_else(|| {
                Error::HandlerNotFound(format!("{} {}", request.method, context.registered_path))
            })?;
        let request = Request::from_incoming(request, context);
        guarded(|| route.call(request)).await
    }
}

/// Run a handler, turning a panic at call or poll time into an error.
async fn guarded<T>(
    call: impl FnOnce() -> LocalBoxFuture<'static, anyhow::Result<T>>,
) -> anyhow::Result<T> {
    let future = std::panic::catch_unwind(AssertUnwindSafe(call)).map_err(panic_error)?;
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panic_error)?
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref()))
}

/// Map an error that escaped a handler onto a response.
fn error_response(err: &anyhow::Error) -> Response {
    if let Some(http) = err.downcast_ref::<HttpError>() {
        tracing::debug!(status = http.status.as_u16(), "handler raised http error");
        return Response {
            status: http.status,
            headers: http.headers.clone(),
            body: http.message.clone().unwrap_or_default().into_bytes(),
        };
    }

    let status = err
        .downcast_ref::<Error>()
        .map_or(StatusCode::INTERNAL_SERVER_ERROR, Error::status);
    let body = format!("{err:#}");
    tracing::warn!(status = status.as_u16(), error = %body, "handler failed");
    Response::new(status).with_body(body)
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::http::IncomingBody;
    use crate::value::Value;
    use http::{HeaderMap, HeaderValue};
    use portico_types::{FunctionFlag, CONTEXT_HEADER};

    fn incoming(method: Method, context: &str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(CONTEXT_HEADER, HeaderValue::from_str(context).unwrap());
        IncomingRequest::new(
            method,
            "http://guest.local/x".parse().unwrap(),
            headers,
            IncomingBody::empty(),
        )
    }

    fn http_context(path: &str) -> String {
        format!(r#"{{"kind":"Http","registered_path":"{path}","path_params":[]}}"#)
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let err = Registry::new(
            vec![
                HttpRoute::get("/a", |_| async { Ok("1") }),
                HttpRoute::get("/a", |_| async { Ok("2") }),
            ],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler(msg) if msg == "GET /a"));
    }

    #[test]
    fn same_path_different_method_is_allowed() {
        let registry = Registry::new(
            vec![
                HttpRoute::get("/a", |_| async { Ok("get") }),
                HttpRoute::post("/a", |_| async { Ok("post") }),
            ],
            Vec::new(),
        )
        .unwrap();
        assert!(registry.route(HttpMethod::Post, "/a").is_some());
    }

    #[test]
    fn duplicate_job_is_rejected() {
        let err = Registry::new(
            Vec::new(),
            vec![
                Job::new("sweep", "@hourly", || async { Ok(()) }),
                Job::new("sweep", "@daily", || async { Ok(()) }),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler(_)));
    }

    #[test]
    fn descriptor_keeps_registration_order() {
        let registry = Registry::new(
            vec![
                HttpRoute::post("/z", |_| async { Ok(()) }),
                HttpRoute::get("/a", |_| async { Ok(()) }),
            ],
            vec![Job::new("nightly", "0 0 3 * * *", || async { Ok(()) })],
        )
        .unwrap();
        let descriptor = registry.init_descriptor();
        assert_eq!(
            descriptor.http_handlers,
            vec![
                (HttpMethod::Post, "/z".to_string()),
                (HttpMethod::Get, "/a".to_string())
            ]
        );
        assert_eq!(
            descriptor.job_handlers,
            vec![("nightly".to_string(), "0 0 3 * * *".to_string())]
        );
    }

    fn functions() -> Vec<ScalarFunction> {
        vec![
            ScalarFunction::new("double", &[FunctionFlag::Deterministic], |[n]: [Value; 1]| {
                Ok(n.as_i64().unwrap_or_default() * 2)
            }),
            ScalarFunction::new("explode", &[], |[]: [Value; 0]| -> anyhow::Result<Value> {
                panic!("bad input")
            }),
        ]
    }

    #[test]
    fn functions_dispatch_by_name() {
        let registry = Registry::new(Vec::new(), Vec::new())
            .unwrap()
            .with_functions(functions())
            .unwrap();
        assert_eq!(
            registry
                .call_function("double", vec![WireValue::Integer(21)])
                .unwrap(),
            WireValue::Integer(42)
        );
        assert_eq!(
            registry.init_descriptor().scalar_functions[0].flags,
            vec![FunctionFlag::Deterministic]
        );
    }

    #[test]
    fn missing_function_is_not_found() {
        let registry = Registry::new(Vec::new(), Vec::new())
            .unwrap()
            .with_functions(functions())
            .unwrap();
        let err = registry.call_function("triple", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::HandlerNotFound(msg) if msg == "function triple"));
    }

    #[test]
    fn panicking_function_is_an_error() {
        let registry = Registry::new(Vec::new(), Vec::new())
            .unwrap()
            .with_functions(functions())
            .unwrap();
        let err = registry.call_function("explode", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Function(msg) if msg == "explode panicked: bad input"));
    }

    #[test]
    fn duplicate_function_is_rejected() {
        let mut twice = functions();
        twice.extend(functions());
        let err = Registry::new(Vec::new(), Vec::new())
            .unwrap()
            .with_functions(twice)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler(msg) if msg == "function double"));
    }

    #[tokio::test]
    async fn jobs_only_run_on_get() {
        let registry = Registry::new(
            Vec::new(),
            vec![Job::new("sweep", "@hourly", || async { Ok(()) })],
        )
        .unwrap();
        let context = r#"{"kind":"Job","registered_path":"sweep"}"#;

        let response = registry.handle(incoming(Method::POST, context)).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let response = registry.handle(incoming(Method::GET, context)).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn method_mismatch_is_not_found() {
        let registry =
            Registry::new(vec![HttpRoute::get("/a", |_| async { Ok("a") })], Vec::new()).unwrap();
        let response = registry
            .handle(incoming(Method::DELETE, &http_context("/a")))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_context_is_internal_error() {
        let registry = Registry::new(Vec::new(), Vec::new()).unwrap();
        let response = registry.handle(incoming(Method::GET, "{oops")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8_lossy(&response.body).contains("malformed request context"));
    }

    #[tokio::test]
    async fn panicking_handler_is_internal_error() {
        let registry = Registry::new(
            vec![HttpRoute::get("/p", |_| async {
                if true {
                    panic!("kaput");
                }
                Ok("unreachable")
            })],
            Vec::new(),
        )
        .unwrap();
        let response = registry.handle(incoming(Method::GET, &http_context("/p"))).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8_lossy(&response.body).contains("kaput"));
    }

    #[tokio::test]
    async fn http_error_headers_are_forwarded() {
        let registry = Registry::new(
            vec![HttpRoute::get("/login", |_| async {
                Err::<(), _>(
                    HttpError::new(StatusCode::SEE_OTHER).with_header("location", "/home").into(),
                )
            })],
            Vec::new(),
        )
        .unwrap();
        let response = registry
            .handle(incoming(Method::GET, &http_context("/login")))
            .await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers,
            vec![("location".to_string(), "/home".to_string())]
        );
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn bridge_errors_keep_their_status() {
        let registry = Registry::new(
            vec![HttpRoute::get("/tx", |_| async {
                Err::<(), _>(anyhow::Error::from(Error::TransactionClosed).context("saving order"))
            })],
            Vec::new(),
        )
        .unwrap();
        let response = registry
            .handle(incoming(Method::GET, &http_context("/tx")))
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            String::from_utf8_lossy(&response.body),
            "saving order: transaction already closed"
        );
    }

    #[tokio::test]
    async fn handler_sees_path_params_and_user() {
        let registry = Registry::new(
            vec![HttpRoute::get("/users/:id", |req: Request| async move {
                let id = req.path_param("id").unwrap_or_default().to_string();
                let email = req.user().map(|u| u.email.clone()).unwrap_or_default();
                Ok(format!("{id} {email}"))
            })],
            Vec::new(),
        )
        .unwrap();
        let context = concat!(
            r#"{"kind":"Http","registered_path":"/users/:id","path_params":[["id","7"]],"#,
            r#""user":{"id":"u","email":"e@x","csrf_token":"c"}}"#
        );
        let response = registry.handle(incoming(Method::GET, context)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"7 e@x");
    }
}
