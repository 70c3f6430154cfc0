//! Bridge error model.
//!
//! [`Error`] covers every failure the bridge itself can produce.
//! [`HttpError`] is raised by guest handlers to request a specific status.

use std::fmt;

use http::StatusCode;
use portico_types::HostError;

/// Errors produced by the guest-side bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value did not have a shape the codec understands.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The reserved context header was missing or not a valid document.
    #[error("malformed request context: {0}")]
    MalformedContext(String),

    /// No handler is registered for the resolved path or job name.
    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    /// Two registrations share the same route or job name.
    #[error("duplicate handler registration: {0}")]
    DuplicateHandler(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction already closed")]
    TransactionClosed,

    /// `begin` was called while another transaction is still open.
    #[error("a transaction is already open for this invocation")]
    TransactionOpen,

    /// The relational engine rejected a statement.
    #[error("database error: {0}")]
    Database(String),

    /// The key-value store rejected an operation.
    #[error("key-value error: {0}")]
    KeyValue(String),

    /// Reading the incoming request body failed.
    #[error("request body error: {0}")]
    Body(String),

    /// Writing the response back to the host failed.
    #[error("response error: {0}")]
    Response(String),

    /// A scalar function failed while the relational engine evaluated it.
    #[error("scalar function error: {0}")]
    Function(String),

    /// A file path was not an absolute path inside the component's root.
    #[error("invalid path {0}")]
    InvalidPath(String),

    /// The host could not open or read a file.
    #[error("file error: {0}")]
    File(String),

    /// The init arguments could not be parsed.
    #[error("invalid guest config: {0}")]
    InvalidConfig(String),

    /// The host cancelled the invocation while a call was pending.
    #[error("invocation cancelled")]
    Cancelled,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a host failure from the relational capability.
    pub(crate) fn database(err: HostError) -> Self {
        match err {
            HostError::Cancelled => Self::Cancelled,
            other => Self::Database(other.to_string()),
        }
    }

    /// Map a host failure from the key-value capability.
    pub(crate) fn key_value(err: HostError) -> Self {
        match err {
            HostError::Cancelled => Self::Cancelled,
            other => Self::KeyValue(other.to_string()),
        }
    }

    /// Map a host failure while reading the request body.
    pub(crate) fn body(err: HostError) -> Self {
        match err {
            HostError::Cancelled => Self::Cancelled,
            other => Self::Body(other.to_string()),
        }
    }

    /// Map a host failure from the file capability.
    pub(crate) fn file(err: HostError) -> Self {
        match err {
            HostError::Cancelled => Self::Cancelled,
            other => Self::File(other.to_string()),
        }
    }

    /// Map a host failure while emitting the response.
    pub(crate) fn response(err: HostError) -> Self {
        match err {
            HostError::Cancelled => Self::Cancelled,
            other => Self::Response(other.to_string()),
        }
    }

    /// Status code the dispatcher answers with when this error escapes a handler.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::HandlerNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error raised by guest code to answer with an explicit status.
///
/// Passed through verbatim by the dispatcher: the status becomes the
/// response status, the message becomes the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpError {
    /// Error with a status and no body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            headers: Vec::new(),
        }
    }

    /// Error with a status and a message body.
    #[must_use]
    pub fn message(status: StatusCode, message: impl fmt::Display) -> Self {
        Self {
            status,
            message: Some(message.to_string()),
            headers: Vec::new(),
        }
    }

    /// Attach a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.status.as_u16()),
            None => write!(f, "{}", self.status),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        Self::message(err.status(), err)
    }
}
