//! Native stand-ins for the host side of the component boundary.
//!
//! [`MemoryHost`] implements every capability in memory and is the default
//! host off `wasm32`, so guest handlers can be unit-tested without a runtime.
//! [`RecordingOutparam`] captures what the response writer emitted and in
//! which order.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use portico_types::loopback::{EXECUTE_PATH, QUERY_PATH};
use portico_types::{
    HostError, LoopbackRequest, LoopbackResponse, WireValue, LOOPBACK_AUTHORITY,
};

use crate::host_ffi::{BucketHandle, HostImports, IncomingResponse, KeyPage, OutgoingRequest};
use crate::response::{BodyStream, OutgoingResponse, ResponseOutparam};
use crate::value;

/// Keys returned per `kv_list_keys` page.
pub const PAGE_SIZE: usize = 100;

/// Scripted outcome of the next relational statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Rows(Vec<Vec<WireValue>>),
    Affected(u64),
    Error(String),
}

/// A statement the host received, through either transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub query: String,
    pub params: Vec<WireValue>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, BucketHandle>,
    data: HashMap<BucketHandle, BTreeMap<String, Vec<u8>>>,
    kv_write_budget: Option<usize>,
    cancelled: bool,
    tx_open: bool,
    scripted: VecDeque<Scripted>,
    statements: Vec<Statement>,
    routes: HashMap<String, VecDeque<Result<IncomingResponse, HostError>>>,
    sent: Vec<OutgoingRequest>,
    files: HashMap<String, Vec<u8>>,
    calls: Vec<&'static str>,
}

impl State {
    fn enter(&mut self, call: &'static str) -> Result<(), HostError> {
        self.calls.push(call);
        if self.cancelled {
            return Err(HostError::Cancelled);
        }
        Ok(())
    }

    fn bucket(
        &mut self,
        bucket: BucketHandle,
    ) -> Result<&mut BTreeMap<String, Vec<u8>>, HostError> {
        self.data.get_mut(&bucket).ok_or(HostError::NoSuchStore)
    }

    fn spend_kv_write(&mut self) -> Result<(), HostError> {
        match self.kv_write_budget.as_mut() {
            Some(0) => Err(HostError::other("injected key-value write failure")),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn statement(&mut self, query: &str, params: &[WireValue]) -> Scripted {
        self.statements.push(Statement {
            query: query.to_string(),
            params: params.to_vec(),
        });
        self.scripted.pop_front().unwrap_or(Scripted::Rows(Vec::new()))
    }

    fn loopback(&mut self, path: &str, body: &[u8]) -> LoopbackResponse {
        let request: LoopbackRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => return LoopbackResponse::Error(format!("malformed loopback body: {err}")),
        };
        let mut params = Vec::with_capacity(request.params.len());
        for param in request.params {
            match value::from_envelope(param) {
                Ok(v) => params.push(value::encode(v)),
                Err(err) => return LoopbackResponse::Error(err.to_string()),
            }
        }

        match (path, self.statement(&request.query, &params)) {
            (_, Scripted::Error(message)) => LoopbackResponse::Error(message),
            (QUERY_PATH, Scripted::Rows(rows)) => match envelope_rows(rows) {
                Ok(rows) => LoopbackResponse::Query { rows },
                Err(message) => LoopbackResponse::Error(message),
            },
            (QUERY_PATH, Scripted::Affected(_)) => LoopbackResponse::Query { rows: Vec::new() },
            (EXECUTE_PATH, Scripted::Affected(n)) => LoopbackResponse::Execute { rows_affected: n },
            (EXECUTE_PATH, Scripted::Rows(_)) => LoopbackResponse::Execute { rows_affected: 0 },
            (other, _) => LoopbackResponse::Error(format!("unknown loopback path {other}")),
        }
    }
}

fn envelope_rows(rows: Vec<Vec<WireValue>>) -> Result<Vec<Vec<serde_json::Value>>, String> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| value::to_envelope(&value::decode(cell)).map_err(|e| e.to_string()))
                .collect()
        })
        .collect()
}

/// In-memory host implementing every capability import.
///
/// Starts with the default bucket `""`. Statements without a scripted
/// outcome return no rows and affect no rows.
pub struct MemoryHost {
    state: Mutex<State>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        let host = Self {
            state: Mutex::new(State::default()),
        };
        host.add_bucket("");
        host
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `name` openable. Returns its handle.
    pub fn add_bucket(&self, name: &str) -> BucketHandle {
        let mut state = self.state();
        if let Some(handle) = state.buckets.get(name) {
            return *handle;
        }
        let handle = BucketHandle::try_from(state.buckets.len()).unwrap_or(BucketHandle::MAX);
        state.buckets.insert(name.to_string(), handle);
        state.data.insert(handle, BTreeMap::new());
        handle
    }

    /// Let the next `n` key writes succeed, then fail every further write.
    ///
    /// Each pair of a batch counts as one write.
    pub fn fail_kv_writes_after(&self, n: usize) {
        self.state().kv_write_budget = Some(n);
    }

    /// Fail every pending and future call with [`HostError::Cancelled`].
    pub fn cancel(&self) {
        self.state().cancelled = true;
    }

    /// Undo [`MemoryHost::fail_kv_writes_after`] and [`MemoryHost::cancel`].
    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.kv_write_budget = None;
        state.cancelled = false;
    }

    /// Queue the outcome of the next relational statement.
    pub fn script(&self, outcome: Scripted) {
        self.state().scripted.push_back(outcome);
    }

    /// Every statement received so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.state().statements.clone()
    }

    /// Queue a response for the next outgoing request to `uri`.
    pub fn respond(&self, uri: &str, response: IncomingResponse) {
        self.state()
            .routes
            .entry(uri.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue a transport failure for the next outgoing request to `uri`.
    pub fn fail_request(&self, uri: &str, err: HostError) {
        self.state()
            .routes
            .entry(uri.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Make `contents` readable at the absolute `path`.
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.state().files.insert(path.to_string(), contents.into());
    }

    /// Outgoing requests sent so far, loopback calls included.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingRequest> {
        self.state().sent.clone()
    }

    /// Names of the capability calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    /// How many times `call` was made.
    #[must_use]
    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    #[must_use]
    pub fn transaction_open(&self) -> bool {
        self.state().tx_open
    }
}

impl HostImports for MemoryHost {
    fn tx_begin(&self) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("tx_begin")?;
        if state.tx_open {
            return Err(HostError::other("transaction already open"));
        }
        state.tx_open = true;
        Ok(())
    }

    fn tx_query(
        &self,
        query: &str,
        params: &[WireValue],
    ) -> Result<Vec<Vec<WireValue>>, HostError> {
        let mut state = self.state();
        state.enter("tx_query")?;
        match state.statement(query, params) {
            Scripted::Rows(rows) => Ok(rows),
            Scripted::Affected(_) => Ok(Vec::new()),
            Scripted::Error(message) => Err(HostError::Other(message)),
        }
    }

    fn tx_execute(&self, query: &str, params: &[WireValue]) -> Result<u64, HostError> {
        let mut state = self.state();
        state.enter("tx_execute")?;
        match state.statement(query, params) {
            Scripted::Affected(n) => Ok(n),
            Scripted::Rows(_) => Ok(0),
            Scripted::Error(message) => Err(HostError::Other(message)),
        }
    }

    fn tx_commit(&self) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("tx_commit")?;
        if !state.tx_open {
            return Err(HostError::other("no open transaction"));
        }
        state.tx_open = false;
        Ok(())
    }

    fn tx_rollback(&self) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("tx_rollback")?;
        if !state.tx_open {
            return Err(HostError::other("no open transaction"));
        }
        state.tx_open = false;
        Ok(())
    }

    fn kv_open(&self, identifier: &str) -> Result<BucketHandle, HostError> {
        let mut state = self.state();
        state.enter("kv_open")?;
        state
            .buckets
            .get(identifier)
            .copied()
            .ok_or(HostError::NoSuchStore)
    }

    fn kv_get(&self, bucket: BucketHandle, key: &str) -> Result<Option<Vec<u8>>, HostError> {
        let mut state = self.state();
        state.enter("kv_get")?;
        Ok(state.bucket(bucket)?.get(key).cloned())
    }

    fn kv_set(&self, bucket: BucketHandle, key: &str, value: &[u8]) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("kv_set")?;
        state.spend_kv_write()?;
        state.bucket(bucket)?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn kv_delete(&self, bucket: BucketHandle, key: &str) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("kv_delete")?;
        state.spend_kv_write()?;
        state.bucket(bucket)?.remove(key);
        Ok(())
    }

    fn kv_exists(&self, bucket: BucketHandle, key: &str) -> Result<bool, HostError> {
        let mut state = self.state();
        state.enter("kv_exists")?;
        Ok(state.bucket(bucket)?.contains_key(key))
    }

    fn kv_list_keys(
        &self,
        bucket: BucketHandle,
        cursor: Option<u64>,
    ) -> Result<KeyPage, HostError> {
        let mut state = self.state();
        state.enter("kv_list_keys")?;
        let entries = state.bucket(bucket)?;
        let start = cursor
            .and_then(|c| usize::try_from(c).ok())
            .unwrap_or(0);
        let keys: Vec<String> = entries.keys().skip(start).take(PAGE_SIZE).cloned().collect();
        let next = start + keys.len();
        let cursor = (next < entries.len()).then(|| next as u64);
        Ok(KeyPage { keys, cursor })
    }

    fn kv_increment(&self, bucket: BucketHandle, key: &str, delta: u64) -> Result<u64, HostError> {
        let mut state = self.state();
        state.enter("kv_increment")?;
        state.spend_kv_write()?;
        let entries = state.bucket(bucket)?;
        let current = match entries.get(key) {
            None => 0,
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| HostError::other(format!("value at {key} is not a counter")))?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| HostError::other(format!("counter {key} overflowed")))?;
        entries.insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    fn kv_get_many(
        &self,
        bucket: BucketHandle,
        keys: &[String],
    ) -> Result<Vec<Option<(String, Vec<u8>)>>, HostError> {
        let mut state = self.state();
        state.enter("kv_get_many")?;
        let entries = state.bucket(bucket)?;
        Ok(keys
            .iter()
            .map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn kv_set_many(
        &self,
        bucket: BucketHandle,
        pairs: &[(String, Vec<u8>)],
    ) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("kv_set_many")?;
        for (key, value) in pairs {
            state.spend_kv_write()?;
            state.bucket(bucket)?.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn kv_delete_many(&self, bucket: BucketHandle, keys: &[String]) -> Result<(), HostError> {
        let mut state = self.state();
        state.enter("kv_delete_many")?;
        for key in keys {
            state.spend_kv_write()?;
            state.bucket(bucket)?.remove(key);
        }
        Ok(())
    }

    fn send_request(&self, request: OutgoingRequest) -> Result<IncomingResponse, HostError> {
        let mut state = self.state();
        state.enter("send_request")?;
        state.sent.push(request.clone());

        let uri: http::Uri = request
            .uri
            .parse()
            .map_err(|e| HostError::other(format!("invalid uri {}: {e}", request.uri)))?;
        if uri.authority().map(http::uri::Authority::as_str) == Some(LOOPBACK_AUTHORITY) {
            let response = state.loopback(uri.path(), &request.body);
            let body =
                serde_json::to_vec(&response).map_err(|e| HostError::other(e.to_string()))?;
            return Ok(IncomingResponse {
                status: 200,
                headers: vec![("content-type".into(), "application/json".into())],
                body,
            });
        }

        state
            .routes
            .get_mut(&request.uri)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(HostError::other(format!("connection refused: {}", request.uri)))
            })
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError> {
        let mut state = self.state();
        state.enter("read_file")?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| HostError::other(format!("no such file: {path}")))
    }
}

/// Observable step of the response writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Created,
    StatusSet(u16),
    StreamOpened,
    Written(usize),
    StreamDisposed,
    BodyFinished,
    Committed,
}

/// Everything a [`RecordingOutparam`] saw.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub events: Vec<ResponseEvent>,
    fail_writes: bool,
}

impl Recorded {
    /// Whether the response reached the outparam.
    #[must_use]
    pub fn committed(&self) -> bool {
        self.events.contains(&ResponseEvent::Committed)
    }

    /// Body as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

type Shared = Arc<Mutex<Recorded>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Recorded> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Response outparam that records instead of talking to a host.
///
/// Clones share one record, so keep a clone to inspect after dispatch.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutparam {
    shared: Shared,
}

impl RecordingOutparam {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every body write fail.
    pub fn fail_writes(&self) {
        lock(&self.shared).fail_writes = true;
    }

    /// Snapshot of what was recorded.
    #[must_use]
    pub fn record(&self) -> Recorded {
        lock(&self.shared).clone()
    }
}

impl ResponseOutparam for RecordingOutparam {
    type Response = RecordingResponse;

    fn new_response(
        &mut self,
        headers: &[(String, String)],
    ) -> Result<RecordingResponse, HostError> {
        let mut record = lock(&self.shared);
        record.events.push(ResponseEvent::Created);
        record.headers = headers.to_vec();
        Ok(RecordingResponse {
            shared: self.shared.clone(),
        })
    }

    fn set(self, _response: RecordingResponse) {
        lock(&self.shared).events.push(ResponseEvent::Committed);
    }
}

/// Outgoing response created by a [`RecordingOutparam`].
#[derive(Debug)]
pub struct RecordingResponse {
    shared: Shared,
}

impl OutgoingResponse for RecordingResponse {
    fn set_status_code(&mut self, status: u16) -> Result<(), HostError> {
        let mut record = lock(&self.shared);
        record.status = Some(status);
        record.events.push(ResponseEvent::StatusSet(status));
        Ok(())
    }

    fn open_body(&mut self) -> Result<Box<dyn BodyStream + '_>, HostError> {
        lock(&self.shared).events.push(ResponseEvent::StreamOpened);
        Ok(Box::new(RecordingStream {
            shared: &self.shared,
        }))
    }

    fn finish_body(&mut self) -> Result<(), HostError> {
        lock(&self.shared).events.push(ResponseEvent::BodyFinished);
        Ok(())
    }
}

struct RecordingStream<'a> {
    shared: &'a Shared,
}

impl BodyStream for RecordingStream<'_> {
    fn blocking_write_and_flush(&mut self, bytes: &[u8]) -> Result<(), HostError> {
        let mut record = lock(self.shared);
        if record.fail_writes {
            return Err(HostError::other("stream closed"));
        }
        record.body.extend_from_slice(bytes);
        record.events.push(ResponseEvent::Written(bytes.len()));
        Ok(())
    }
}

impl Drop for RecordingStream<'_> {
    fn drop(&mut self) {
        lock(self.shared).events.push(ResponseEvent::StreamDisposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips_envelopes() {
        let host = MemoryHost::new();
        host.script(Scripted::Rows(vec![vec![
            WireValue::Integer(1),
            WireValue::Blob(vec![0xfb, 0xff]),
        ]]));

        let body = serde_json::to_vec(&LoopbackRequest {
            query: "SELECT id, data FROM t WHERE id = ?".into(),
            params: vec![serde_json::json!(1)],
        })
        .unwrap();
        let response = host
            .send_request(OutgoingRequest {
                method: "POST".into(),
                uri: "http://__sqlite/query".into(),
                headers: Vec::new(),
                body,
            })
            .unwrap();

        let parsed: LoopbackResponse = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            parsed,
            LoopbackResponse::Query {
                rows: vec![vec![serde_json::json!(1), serde_json::json!({"blob": "-_8"})]]
            }
        );
        assert_eq!(host.statements()[0].params, vec![WireValue::Integer(1)]);
    }

    #[test]
    fn unscripted_outgoing_request_is_refused() {
        let host = MemoryHost::new();
        let err = host
            .send_request(OutgoingRequest {
                method: "GET".into(),
                uri: "https://example.com/".into(),
                headers: Vec::new(),
                body: Vec::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn list_keys_pages_past_page_size() {
        let host = MemoryHost::new();
        let bucket = host.kv_open("").unwrap();
        for i in 0..(PAGE_SIZE + 5) {
            host.kv_set(bucket, &format!("k{i:04}"), b"").unwrap();
        }
        let first = host.kv_list_keys(bucket, None).unwrap();
        assert_eq!(first.keys.len(), PAGE_SIZE);
        let second = host.kv_list_keys(bucket, first.cursor).unwrap();
        assert_eq!(second.keys.len(), 5);
        assert_eq!(second.cursor, None);
    }
}
