//! Outbound HTTP through the host's outgoing-request capability.
//!
//! Failures are reported as [`HttpError`] so a handler can bubble them up
//! with `?` and the dispatcher answers with the upstream status.

use std::sync::Arc;

use http::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::HttpError;
use crate::host_ffi::{self, HostImports, OutgoingRequest};
use crate::retry::{self, CancelSignal, RetryPolicy};

/// Method, headers and body of an outbound request.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }
}

impl FetchOptions {
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Fetch `uri` and return the response body.
///
/// # Errors
///
/// A non-2xx response becomes an [`HttpError`] with the upstream status and
/// body text; a transport failure becomes `502 Bad Gateway`.
pub async fn fetch_bytes(uri: &str, options: FetchOptions) -> Result<Vec<u8>, HttpError> {
    fetch_bytes_with(&host_ffi::host(), uri, options).await
}

/// [`fetch_bytes`] through an explicit host.
///
/// # Errors
///
/// See [`fetch_bytes`].
pub async fn fetch_bytes_with(
    host: &Arc<dyn HostImports>,
    uri: &str,
    options: FetchOptions,
) -> Result<Vec<u8>, HttpError> {
    let request = OutgoingRequest {
        method: options.method.as_str().to_string(),
        uri: uri.to_string(),
        headers: options.headers,
        body: options.body.unwrap_or_default(),
    };
    tracing::debug!(method = %request.method, uri, "outgoing request");

    let response = host
        .send_request(request)
        .map_err(|e| HttpError::message(StatusCode::BAD_GATEWAY, format!("fetch {uri}: {e}")))?;

    let status = StatusCode::from_u16(response.status).map_err(|_| {
        HttpError::message(
            StatusCode::BAD_GATEWAY,
            format!("fetch {uri}: invalid upstream status {}", response.status),
        )
    })?;
    if !status.is_success() {
        return Err(HttpError::message(
            status,
            String::from_utf8_lossy(&response.body),
        ));
    }
    Ok(response.body)
}

/// Fetch `uri` and deserialize the JSON body.
///
/// # Errors
///
/// See [`fetch_bytes`]; an undecodable body becomes `502 Bad Gateway`.
pub async fn fetch_json<T: DeserializeOwned>(
    uri: &str,
    options: FetchOptions,
) -> Result<T, HttpError> {
    fetch_json_with(&host_ffi::host(), uri, options).await
}

/// [`fetch_json`] through an explicit host.
///
/// # Errors
///
/// See [`fetch_json`].
pub async fn fetch_json_with<T: DeserializeOwned>(
    host: &Arc<dyn HostImports>,
    uri: &str,
    options: FetchOptions,
) -> Result<T, HttpError> {
    let body = fetch_bytes_with(host, uri, options).await?;
    serde_json::from_slice(&body).map_err(|e| {
        HttpError::message(
            StatusCode::BAD_GATEWAY,
            format!("fetch {uri}: invalid JSON body: {e}"),
        )
    })
}

/// [`fetch_bytes`] retried under `policy`. Client errors are not retried.
///
/// # Errors
///
/// The last failure, or `500` with "invocation cancelled" once `signal` is raised.
pub async fn fetch_bytes_with_retry(
    uri: &str,
    options: FetchOptions,
    policy: &RetryPolicy,
    signal: &CancelSignal,
) -> Result<Vec<u8>, HttpError> {
    let host = host_ffi::host();
    retry::retry(policy, signal, || {
        fetch_bytes_with(&host, uri, options.clone())
    })
    .await
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::host_ffi::IncomingResponse;
    use crate::testing::MemoryHost;
    use portico_types::HostError;

    const URI: &str = "https://api.example.com/items";

    fn host() -> (Arc<MemoryHost>, Arc<dyn HostImports>) {
        let memory = Arc::new(MemoryHost::new());
        let host: Arc<dyn HostImports> = memory.clone();
        (memory, host)
    }

    fn reply(status: u16, body: &str) -> IncomingResponse {
        IncomingResponse {
            status,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let (memory, host) = host();
        memory.respond(URI, reply(200, "[1,2]"));

        let items: Vec<u32> = fetch_json_with(&host, URI, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(memory.sent()[0].method, "GET");
    }

    #[tokio::test]
    async fn forwards_method_headers_and_body() {
        let (memory, host) = host();
        memory.respond(URI, reply(201, ""));

        let options = FetchOptions::default()
            .method(Method::POST)
            .header("authorization", "Bearer t")
            .body("{}");
        fetch_bytes_with(&host, URI, options).await.unwrap();

        let sent = memory.sent();
        let sent = &sent[0];
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.headers, vec![("authorization".to_string(), "Bearer t".to_string())]);
        assert_eq!(sent.body, b"{}");
    }

    #[tokio::test]
    async fn upstream_status_is_preserved() {
        let (memory, host) = host();
        memory.respond(URI, reply(404, "no such item"));

        let err = fetch_bytes_with(&host, URI, FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message.as_deref(), Some("no such item"));
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway() {
        let (memory, host) = host();
        memory.fail_request(URI, HostError::other("dns failure"));

        let err = fetch_bytes_with(&host, URI, FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.unwrap().contains("dns failure"));
    }

    #[tokio::test]
    async fn invalid_json_is_bad_gateway() {
        let (memory, host) = host();
        memory.respond(URI, reply(200, "<html>"));

        let err = fetch_json_with::<serde_json::Value>(&host, URI, FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn retry_recovers_from_server_errors() {
        let (memory, host) = host();
        memory.respond(URI, reply(503, "busy"));
        memory.respond(URI, reply(200, "ok"));

        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        };
        let body = retry::retry(&policy, &CancelSignal::new(), || {
            fetch_bytes_with(&host, URI, FetchOptions::default())
        })
        .await
        .unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(memory.call_count("send_request"), 2);
    }
}
