//! Component-model bindings and their adapters onto the bridge traits.

use std::sync::OnceLock;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use portico_types::{FunctionFlag, HostError as WireHostError, WireValue};

use crate::error::{Error, Result};
use crate::host_ffi::{BucketHandle, HostImports, IncomingResponse, KeyPage, OutgoingRequest};
use crate::http::{IncomingBody, IncomingRequest, InputStream};
use crate::registry::{Guest, Registry};
use crate::response::{BodyStream, OutgoingResponse, ResponseOutparam};

wit_bindgen::generate!({
    path: "../../wit",
    world: "guest",
    pub_export_macro: true,
    export_macro_name: "__export_portico_world",
    default_bindings_module: "portico_sdk::bindings",
});

use self::exports::portico::guest::runtime as wit_runtime;
use self::portico::guest::{filesystem, keyvalue, outgoing_http, transaction, types};

fn host_error(err: types::HostError) -> WireHostError {
    match err {
        types::HostError::NoSuchStore => WireHostError::NoSuchStore,
        types::HostError::AccessDenied => WireHostError::AccessDenied,
        types::HostError::Cancelled => WireHostError::Cancelled,
        types::HostError::Other(message) => WireHostError::Other(message),
    }
}

fn to_wit(value: &WireValue) -> types::Value {
    match value {
        WireValue::Null => types::Value::Null,
        WireValue::Integer(n) => types::Value::Integer(*n),
        WireValue::Real(r) => types::Value::Real(*r),
        WireValue::Text(s) => types::Value::Text(s.clone()),
        WireValue::Blob(b) => types::Value::Blob(b.clone()),
    }
}

fn from_wit(value: types::Value) -> WireValue {
    match value {
        types::Value::Null => WireValue::Null,
        types::Value::Integer(n) => WireValue::Integer(n),
        types::Value::Real(r) => WireValue::Real(r),
        types::Value::Text(s) => WireValue::Text(s),
        types::Value::Blob(b) => WireValue::Blob(b),
    }
}

/// Host imports backed by the generated component bindings.
pub struct WasmHostImports;

impl HostImports for WasmHostImports {
    fn tx_begin(&self) -> std::result::Result<(), WireHostError> {
        transaction::begin().map_err(host_error)
    }

    fn tx_query(
        &self,
        query: &str,
        params: &[WireValue],
    ) -> std::result::Result<Vec<Vec<WireValue>>, WireHostError> {
        let params: Vec<types::Value> = params.iter().map(to_wit).collect();
        let rows = transaction::query(query, &params).map_err(host_error)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(from_wit).collect())
            .collect())
    }

    fn tx_execute(
        &self,
        query: &str,
        params: &[WireValue],
    ) -> std::result::Result<u64, WireHostError> {
        let params: Vec<types::Value> = params.iter().map(to_wit).collect();
        transaction::execute(query, &params).map_err(host_error)
    }

    fn tx_commit(&self) -> std::result::Result<(), WireHostError> {
        transaction::commit().map_err(host_error)
    }

    fn tx_rollback(&self) -> std::result::Result<(), WireHostError> {
        transaction::rollback().map_err(host_error)
    }

    fn kv_open(&self, identifier: &str) -> std::result::Result<BucketHandle, WireHostError> {
        keyvalue::open(identifier).map_err(host_error)
    }

    fn kv_get(
        &self,
        bucket: BucketHandle,
        key: &str,
    ) -> std::result::Result<Option<Vec<u8>>, WireHostError> {
        keyvalue::get(bucket, key).map_err(host_error)
    }

    fn kv_set(
        &self,
        bucket: BucketHandle,
        key: &str,
        value: &[u8],
    ) -> std::result::Result<(), WireHostError> {
        keyvalue::set(bucket, key, value).map_err(host_error)
    }

    fn kv_delete(&self, bucket: BucketHandle, key: &str) -> std::result::Result<(), WireHostError> {
        keyvalue::delete(bucket, key).map_err(host_error)
    }

    fn kv_exists(
        &self,
        bucket: BucketHandle,
        key: &str,
    ) -> std::result::Result<bool, WireHostError> {
        keyvalue::exists(bucket, key).map_err(host_error)
    }

    fn kv_list_keys(
        &self,
        bucket: BucketHandle,
        cursor: Option<u64>,
    ) -> std::result::Result<KeyPage, WireHostError> {
        let page = keyvalue::list_keys(bucket, cursor).map_err(host_error)?;
        Ok(KeyPage {
            keys: page.keys,
            cursor: page.cursor,
        })
    }

    fn kv_increment(
        &self,
        bucket: BucketHandle,
        key: &str,
        delta: u64,
    ) -> std::result::Result<u64, WireHostError> {
        keyvalue::increment(bucket, key, delta).map_err(host_error)
    }

    fn kv_get_many(
        &self,
        bucket: BucketHandle,
        keys: &[String],
    ) -> std::result::Result<Vec<Option<(String, Vec<u8>)>>, WireHostError> {
        keyvalue::get_many(bucket, keys).map_err(host_error)
    }

    fn kv_set_many(
        &self,
        bucket: BucketHandle,
        pairs: &[(String, Vec<u8>)],
    ) -> std::result::Result<(), WireHostError> {
        keyvalue::set_many(bucket, pairs).map_err(host_error)
    }

    fn kv_delete_many(
        &self,
        bucket: BucketHandle,
        keys: &[String],
    ) -> std::result::Result<(), WireHostError> {
        keyvalue::delete_many(bucket, keys).map_err(host_error)
    }

    fn send_request(
        &self,
        request: OutgoingRequest,
    ) -> std::result::Result<IncomingResponse, WireHostError> {
        let response = outgoing_http::send(&outgoing_http::Request {
            method: request.method,
            uri: request.uri,
            headers: request.headers,
            body: request.body,
        })
        .map_err(host_error)?;
        Ok(IncomingResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    fn read_file(&self, path: &str) -> std::result::Result<Vec<u8>, WireHostError> {
        filesystem::read_file(path).map_err(host_error)
    }
}

/// Body stream of an incoming request. Keeps the request resource alive
/// for as long as the stream is read.
struct WasmBody {
    stream: types::InputStream,
    _request: types::IncomingRequest,
}

impl InputStream for WasmBody {
    fn blocking_read(&mut self, len: u64) -> std::result::Result<Option<Vec<u8>>, WireHostError> {
        self.stream.blocking_read(len).map_err(host_error)
    }
}

fn incoming_request(request: types::IncomingRequest) -> Result<IncomingRequest> {
    let method = Method::from_bytes(request.method().as_bytes())
        .map_err(|e| Error::InvalidValue(format!("invalid request method: {e}")))?;

    let mut uri = Uri::builder();
    if let Some(scheme) = request.scheme() {
        uri = uri.scheme(scheme.as_str());
    }
    if let Some(authority) = request.authority() {
        uri = uri.authority(authority.as_str());
    }
    let uri = uri
        .path_and_query(request.path_with_query().as_str())
        .build()
        .map_err(|e| Error::InvalidValue(format!("invalid request uri: {e}")))?;

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidValue(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| Error::InvalidValue(format!("invalid value for header {name}: {e}")))?;
        headers.append(name, value);
    }

    let stream = request.consume().map_err(|e| Error::body(host_error(e)))?;
    let body = IncomingBody::new(Box::new(WasmBody {
        stream,
        _request: request,
    }));
    Ok(IncomingRequest::new(method, uri, headers, body))
}

struct WasmStream(types::OutputStream);

impl BodyStream for WasmStream {
    fn blocking_write_and_flush(&mut self, bytes: &[u8]) -> std::result::Result<(), WireHostError> {
        self.0.blocking_write_and_flush(bytes).map_err(host_error)
    }
}

/// Outgoing response resource.
pub struct WasmResponse(types::OutgoingResponse);

impl OutgoingResponse for WasmResponse {
    fn set_status_code(&mut self, status: u16) -> std::result::Result<(), WireHostError> {
        self.0
            .set_status_code(status)
            .map_err(|()| WireHostError::other(format!("invalid status code {status}")))
    }

    fn open_body(&mut self) -> std::result::Result<Box<dyn BodyStream + '_>, WireHostError> {
        let stream = self.0.body().map_err(host_error)?;
        Ok(Box::new(WasmStream(stream)))
    }

    fn finish_body(&mut self) -> std::result::Result<(), WireHostError> {
        self.0.finish().map_err(host_error)
    }
}

/// Response outparam resource handed to the invocation export.
pub struct WasmOutparam(types::ResponseOutparam);

impl ResponseOutparam for WasmOutparam {
    type Response = WasmResponse;

    fn new_response(
        &mut self,
        headers: &[(String, String)],
    ) -> std::result::Result<WasmResponse, WireHostError> {
        Ok(WasmResponse(types::OutgoingResponse::new(headers)))
    }

    fn set(self, response: WasmResponse) {
        types::ResponseOutparam::set(self.0, response.0);
    }
}

/// Body of the generated init export.
#[doc(hidden)]
pub fn init<G: Guest>(
    cell: &OnceLock<Registry>,
    args: &str,
) -> std::result::Result<wit_runtime::InitDescriptor, String> {
    let descriptor = crate::export::initialize::<G>(cell, args).map_err(|e| e.to_string())?;
    Ok(wit_runtime::InitDescriptor {
        http_handlers: descriptor
            .http_handlers
            .into_iter()
            .map(|(method, path)| (method.as_str().to_string(), path))
            .collect(),
        job_handlers: descriptor.job_handlers,
        scalar_functions: descriptor
            .scalar_functions
            .into_iter()
            .map(|f| wit_runtime::ScalarFunction {
                name: f.name,
                num_args: f.num_args,
                flags: f.flags.into_iter().map(function_flag).collect(),
            })
            .collect(),
    })
}

fn function_flag(flag: FunctionFlag) -> wit_runtime::FunctionFlag {
    match flag {
        FunctionFlag::Deterministic => wit_runtime::FunctionFlag::Deterministic,
        FunctionFlag::DirectOnly => wit_runtime::FunctionFlag::DirectOnly,
        FunctionFlag::Innocuous => wit_runtime::FunctionFlag::Innocuous,
        FunctionFlag::Subtype => wit_runtime::FunctionFlag::Subtype,
    }
}

/// Body of the generated scalar function export.
#[doc(hidden)]
pub fn call_function(
    cell: &OnceLock<Registry>,
    name: &str,
    args: Vec<types::Value>,
) -> std::result::Result<types::Value, String> {
    let args = args.into_iter().map(from_wit).collect();
    crate::export::call_function(cell, name, args)
        .map(|value| to_wit(&value))
        .map_err(|e| e.to_string())
}

/// Body of the generated invocation export.
#[doc(hidden)]
pub fn handle(
    cell: &OnceLock<Registry>,
    request: types::IncomingRequest,
    outparam: types::ResponseOutparam,
) {
    let outparam = WasmOutparam(outparam);
    match incoming_request(request) {
        Ok(request) => crate::export::invoke(cell, request, outparam),
        Err(err) => {
            tracing::warn!(error = %err, "rejecting undecodable request");
            if let Err(err) = crate::response::write(outparam, 400, err.to_string().as_bytes()) {
                tracing::error!(error = %err, "failed to write response");
            }
        }
    }
}
