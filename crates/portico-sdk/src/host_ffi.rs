//! Guest-side host import wrappers for the component model.
//!
//! Every capability call the bridge makes goes through [`HostImports`], so
//! the rest of the crate can be exercised natively against an in-memory host.

use std::sync::{Arc, OnceLock};

use portico_types::{HostError, WireValue};

/// Handle of an opened key-value bucket.
pub type BucketHandle = u32;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Cursor for the next page, `None` when exhausted.
    pub cursor: Option<u64>,
}

/// Outgoing HTTP request handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Response the host returned for an [`OutgoingRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Host imports abstraction to make capability calls testable on native targets.
pub trait HostImports: Send + Sync {
    fn tx_begin(&self) -> Result<(), HostError>;
    fn tx_query(
        &self,
        query: &str,
        params: &[WireValue],
    ) -> Result<Vec<Vec<WireValue>>, HostError>;
    fn tx_execute(&self, query: &str, params: &[WireValue]) -> Result<u64, HostError>;
    fn tx_commit(&self) -> Result<(), HostError>;
    fn tx_rollback(&self) -> Result<(), HostError>;

    fn kv_open(&self, identifier: &str) -> Result<BucketHandle, HostError>;
    fn kv_get(&self, bucket: BucketHandle, key: &str) -> Result<Option<Vec<u8>>, HostError>;
    fn kv_set(&self, bucket: BucketHandle, key: &str, value: &[u8]) -> Result<(), HostError>;
    fn kv_delete(&self, bucket: BucketHandle, key: &str) -> Result<(), HostError>;
    fn kv_exists(&self, bucket: BucketHandle, key: &str) -> Result<bool, HostError>;
    fn kv_list_keys(
        &self,
        bucket: BucketHandle,
        cursor: Option<u64>,
    ) -> Result<KeyPage, HostError>;
    fn kv_increment(&self, bucket: BucketHandle, key: &str, delta: u64) -> Result<u64, HostError>;
    #[allow(clippy::type_complexity)]
    fn kv_get_many(
        &self,
        bucket: BucketHandle,
        keys: &[String],
    ) -> Result<Vec<Option<(String, Vec<u8>)>>, HostError>;
    fn kv_set_many(
        &self,
        bucket: BucketHandle,
        pairs: &[(String, Vec<u8>)],
    ) -> Result<(), HostError>;
    fn kv_delete_many(&self, bucket: BucketHandle, keys: &[String]) -> Result<(), HostError>;

    fn send_request(&self, request: OutgoingRequest) -> Result<IncomingResponse, HostError>;

    /// Whole contents of the file at the normalized absolute `path`.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostError>;
}

static HOST_IMPORTS: OnceLock<Arc<dyn HostImports>> = OnceLock::new();

fn default_host_imports() -> Arc<dyn HostImports> {
    #[cfg(target_arch = "wasm32")]
    {
        Arc::new(crate::bindings::WasmHostImports)
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Arc::new(crate::testing::MemoryHost::new())
    }
}

/// Process-wide host imports, initialised on first use.
pub fn host() -> Arc<dyn HostImports> {
    HOST_IMPORTS.get_or_init(default_host_imports).clone()
}

/// Installs a custom host imports implementation.
///
/// Only the first call before any capability use takes effect; the rejected
/// value is handed back otherwise. Prefer the `*_with` constructors in tests.
pub fn set_host_imports(imports: Arc<dyn HostImports>) -> Result<(), Arc<dyn HostImports>> {
    HOST_IMPORTS.set(imports)
}
