//! Relational access: explicit transactions and the loopback query path.
//!
//! [`Transaction`] talks to the host's relational engine directly with
//! [`WireValue`]-encoded parameters. Outside a transaction, [`Database`]
//! POSTs JSON-envelope statements to the loopback authority through the
//! outgoing-HTTP capability.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use portico_types::loopback::{EXECUTE_PATH, QUERY_PATH};
use portico_types::{LoopbackRequest, LoopbackResponse, WireValue, LOOPBACK_AUTHORITY};

use crate::error::{Error, Result};
use crate::host_ffi::{self, HostImports, OutgoingRequest};
use crate::value::{self, Value};

thread_local! {
    static TX_OPEN: Cell<bool> = const { Cell::new(false) };
}

/// Rows returned by a query, in engine order.
pub type Rows = Vec<Vec<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// Open transaction for the current invocation.
///
/// At most one exists at a time. A statement error does not roll back; the
/// caller decides. A transaction dropped while still open is rolled back.
///
/// Not `Send`: the open flag lives on the thread that called `begin`, so the
/// handle has to be closed there too.
pub struct Transaction {
    host: Arc<dyn HostImports>,
    state: TransactionState,
    _thread_bound: PhantomData<*const ()>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Begin a transaction through the process-wide host.
///
/// # Errors
///
/// See [`Transaction::begin_with`].
pub fn begin() -> Result<Transaction> {
    Transaction::begin_with(host_ffi::host())
}

impl Transaction {
    /// # Errors
    ///
    /// See [`Transaction::begin_with`].
    pub fn begin() -> Result<Self> {
        begin()
    }

    /// Begin a transaction through `host`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionOpen`] if this invocation already holds an
    /// open transaction (the host is not called), or [`Error::Database`] if
    /// the host refuses.
    pub fn begin_with(host: Arc<dyn HostImports>) -> Result<Self> {
        if TX_OPEN.with(Cell::get) {
            return Err(Error::TransactionOpen);
        }
        host.tx_begin().map_err(Error::database)?;
        TX_OPEN.with(|open| open.set(true));
        Ok(Self {
            host,
            state: TransactionState::Open,
            _thread_bound: PhantomData,
        })
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(Error::TransactionClosed)
            }
        }
    }

    fn close(&mut self, state: TransactionState) {
        self.state = state;
        TX_OPEN.with(|open| open.set(false));
    }

    /// Run a statement returning rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionClosed`] after commit/rollback and
    /// [`Error::Database`] with the engine's message on failure.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.ensure_open()?;
        let params = encode_params(params);
        let rows = self.host.tx_query(sql, &params).map_err(Error::database)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(value::decode).collect())
            .collect())
    }

    /// Run a statement and return the affected row count.
    ///
    /// # Errors
    ///
    /// See [`Transaction::query`].
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let params = encode_params(params);
        self.host.tx_execute(sql, &params).map_err(Error::database)
    }

    /// # Errors
    ///
    /// Returns [`Error::TransactionClosed`] if already terminated. If the host
    /// rejects the commit the transaction stays open.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.host.tx_commit().map_err(Error::database)?;
        self.close(TransactionState::Committed);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::TransactionClosed`] if already terminated.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.host.tx_rollback().map_err(Error::database);
        self.close(TransactionState::RolledBack);
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        tracing::warn!("transaction dropped while open, rolling back");
        if let Err(err) = self.host.tx_rollback() {
            tracing::warn!(error = %err, "implicit rollback failed");
        }
        self.close(TransactionState::RolledBack);
    }
}

fn encode_params(params: &[Value]) -> Vec<WireValue> {
    params.iter().cloned().map(value::encode).collect()
}

/// Non-transactional access over the loopback transport.
#[derive(Clone)]
pub struct Database {
    host: Arc<dyn HostImports>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Loopback handle over the process-wide host.
    #[must_use]
    pub fn new() -> Self {
        Self::with_host(host_ffi::host())
    }

    #[must_use]
    pub fn with_host(host: Arc<dyn HostImports>) -> Self {
        Self { host }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if a parameter cannot be enveloped and
    /// [`Error::Database`] if the engine or the transport fails.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        match self.call(QUERY_PATH, sql, params)? {
            LoopbackResponse::Query { rows } => rows
                .into_iter()
                .map(|row| row.into_iter().map(value::from_envelope).collect())
                .collect(),
            other => Err(unexpected(QUERY_PATH, &other)),
        }
    }

    /// # Errors
    ///
    /// See [`Database::query`].
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self.call(EXECUTE_PATH, sql, params)? {
            LoopbackResponse::Execute { rows_affected } => Ok(rows_affected),
            other => Err(unexpected(EXECUTE_PATH, &other)),
        }
    }

    fn call(&self, path: &str, sql: &str, params: &[Value]) -> Result<LoopbackResponse> {
        let params = params
            .iter()
            .map(value::to_envelope)
            .collect::<Result<Vec<_>>>()?;
        let body = serde_json::to_vec(&LoopbackRequest {
            query: sql.to_string(),
            params,
        })
        .map_err(|e| Error::InvalidValue(e.to_string()))?;

        tracing::debug!(path, "loopback statement");
        let response = self
            .host
            .send_request(OutgoingRequest {
                method: "POST".to_string(),
                uri: format!("http://{LOOPBACK_AUTHORITY}{path}"),
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body,
            })
            .map_err(Error::database)?;

        let parsed: LoopbackResponse = serde_json::from_slice(&response.body).map_err(|e| {
            Error::Database(format!(
                "malformed loopback response (status {}): {e}",
                response.status
            ))
        })?;
        match parsed {
            LoopbackResponse::Error(message) => Err(Error::Database(message)),
            other => Ok(other),
        }
    }
}

fn unexpected(path: &str, response: &LoopbackResponse) -> Error {
    Error::Database(format!("unexpected loopback response for {path}: {response:?}"))
}

/// Run a row-returning statement outside a transaction.
///
/// # Errors
///
/// See [`Database::query`].
pub async fn query(sql: &str, params: &[Value]) -> Result<Rows> {
    Database::new().query(sql, params).await
}

/// Run a statement outside a transaction and return the affected row count.
///
/// # Errors
///
/// See [`Database::query`].
pub async fn execute(sql: &str, params: &[Value]) -> Result<u64> {
    Database::new().execute(sql, params).await
}
