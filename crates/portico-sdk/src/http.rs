//! Request and response types handed to HTTP handlers.

use std::future::Future;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use http::{HeaderMap, Method, StatusCode, Uri};
use portico_types::{ContextUser, HttpMethod, RequestContext, CONTEXT_HEADER};
use serde::Serialize;

use crate::error::{Error, Result};

/// Bytes requested from the host per body read.
const READ_CHUNK: u64 = 64 * 1024;

/// Read side of an incoming request body.
pub trait InputStream {
    /// Read up to `len` bytes. `None` once the stream is exhausted.
    fn blocking_read(
        &mut self,
        len: u64,
    ) -> std::result::Result<Option<Vec<u8>>, portico_types::HostError>;
}

struct BufferedStream {
    data: Vec<u8>,
    pos: usize,
}

impl InputStream for BufferedStream {
    fn blocking_read(
        &mut self,
        len: u64,
    ) -> std::result::Result<Option<Vec<u8>>, portico_types::HostError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let end = self.pos.saturating_add(len).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }
}

/// Body of an incoming request, read lazily from the host.
pub struct IncomingBody {
    stream: Box<dyn InputStream>,
}

impl std::fmt::Debug for IncomingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingBody").finish_non_exhaustive()
    }
}

impl IncomingBody {
    #[must_use]
    pub fn new(stream: Box<dyn InputStream>) -> Self {
        Self { stream }
    }

    /// Body backed by an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Box::new(BufferedStream {
            data: data.into(),
            pos: 0,
        }))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Read one chunk. `None` at end of body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] if the host stream fails.
    pub fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.stream.blocking_read(READ_CHUNK).map_err(Error::body)
    }

    /// Drain the body into memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] if the host stream fails.
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Raw inbound invocation as delivered by the host.
#[derive(Debug)]
pub struct IncomingRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: IncomingBody,
}

impl IncomingRequest {
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: IncomingBody) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }
}

/// What an HTTP handler receives.
///
/// The reserved context header is stripped; every other header and the body
/// are passed through untouched.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    context: RequestContext,
    body: Option<IncomingBody>,
}

impl Request {
    pub(crate) fn from_incoming(incoming: IncomingRequest, context: RequestContext) -> Self {
        let IncomingRequest {
            method,
            uri,
            mut headers,
            body,
        } = incoming;
        headers.remove(CONTEXT_HEADER);
        Self {
            method,
            uri,
            headers,
            context,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.uri.scheme_str()
    }

    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        self.uri.authority().map(http::uri::Authority::as_str)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if it is valid text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Route pattern the host matched, e.g. `/users/:id`.
    #[must_use]
    pub fn registered_path(&self) -> &str {
        &self.context.registered_path
    }

    #[must_use]
    pub fn path_params(&self) -> &[(String, String)] {
        &self.context.path_params
    }

    #[must_use]
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.context.path_param(key)
    }

    #[must_use]
    pub fn user(&self) -> Option<&ContextUser> {
        self.context.user.as_ref()
    }

    /// Take the body stream. Subsequent calls return `None`.
    pub fn take_body(&mut self) -> Option<IncomingBody> {
        self.body.take()
    }

    /// Read the whole body. Empty if it was already taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] if the host stream fails.
    pub async fn body_bytes(&mut self) -> Result<Vec<u8>> {
        match self.body.take() {
            Some(body) => body.bytes().await,
            None => Ok(Vec::new()),
        }
    }

    /// Read the body and deserialize it as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] on read failure or if the body is not valid JSON for `T`.
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.body_bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Body(e.to_string()))
    }
}

/// Response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 200 with `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// 200 with a JSON body and matching content type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if `value` cannot be serialized.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| Error::InvalidValue(e.to_string()))?;
        Ok(Self::ok(body).with_header("content-type", "application/json"))
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Conversion of handler return values into a [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        Response::default()
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for &'static [u8] {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

pub(crate) type HttpHandlerFn =
    dyn Fn(Request) -> LocalBoxFuture<'static, anyhow::Result<Response>> + Send + Sync;

/// A registered HTTP handler: `(method, path, fn)`.
pub struct HttpRoute {
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) handler: Box<HttpHandlerFn>,
}

impl std::fmt::Debug for HttpRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl HttpRoute {
    pub fn new<F, Fut, R>(method: HttpMethod, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        R: IntoResponse,
    {
        Self {
            method,
            path: path.into(),
            handler: Box::new(move |req| {
                handler(req)
                    .map(|res| res.map(IntoResponse::into_response))
                    .boxed_local()
            }),
        }
    }

    pub fn get<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        R: IntoResponse,
    {
        Self::new(HttpMethod::Get, path, handler)
    }

    pub fn post<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        R: IntoResponse,
    {
        Self::new(HttpMethod::Post, path, handler)
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn call(
        &self,
        request: Request,
    ) -> LocalBoxFuture<'static, anyhow::Result<Response>> {
        (self.handler)(request)
    }
}

/// Map an `http` method onto the set a route can be registered for.
#[must_use]
pub fn route_method(method: &Method) -> Option<HttpMethod> {
    Some(match method.as_str() {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "HEAD" => HttpMethod::Head,
        "OPTIONS" => HttpMethod::Options,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        "PUT" => HttpMethod::Put,
        "TRACE" => HttpMethod::Trace,
        "CONNECT" => HttpMethod::Connect,
        _ => return None,
    })
}
