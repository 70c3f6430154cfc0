//! Typed wrapper over the host key-value capability.
//!
//! Single-key operations are atomic from the guest's point of view. Batch
//! operations are not: a failing `set_many`/`delete_many` may leave earlier
//! keys applied, and nothing here rolls them back. Concurrent invocations may
//! also observe a batch half-applied.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::host_ffi::{self, BucketHandle, HostImports, KeyPage};

/// Identifier of the default bucket.
pub const DEFAULT_BUCKET: &str = "";

/// Open the default bucket through the process-wide host.
///
/// # Errors
///
/// Returns [`Error::KeyValue`] if the host refuses the bucket.
pub fn open() -> Result<Store> {
    Store::open()
}

/// Handle to one host bucket.
#[derive(Clone)]
pub struct Store {
    host: Arc<dyn HostImports>,
    bucket: BucketHandle,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("bucket", &self.bucket).finish()
    }
}

impl Store {
    /// Open the default bucket. Repeated calls yield equivalent handles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] if the host refuses the bucket.
    pub fn open() -> Result<Self> {
        Self::open_with(host_ffi::host(), DEFAULT_BUCKET)
    }

    /// Open a named bucket through the process-wide host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] if the bucket does not exist or is not accessible.
    pub fn open_bucket(identifier: &str) -> Result<Self> {
        Self::open_with(host_ffi::host(), identifier)
    }

    /// Open `identifier` through an explicit host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] if the bucket does not exist or is not accessible.
    pub fn open_with(host: Arc<dyn HostImports>, identifier: &str) -> Result<Self> {
        let bucket = host.kv_open(identifier).map_err(Error::key_value)?;
        Ok(Self { host, bucket })
    }

    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.host.kv_get(self.bucket, key).map_err(Error::key_value)
    }

    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.host
            .kv_set(self.bucket, key, value)
            .map_err(Error::key_value)
    }

    /// Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.host.kv_delete(self.bucket, key).map_err(Error::key_value)
    }

    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.host.kv_exists(self.bucket, key).map_err(Error::key_value)
    }

    /// Atomically add `delta` to the decimal counter stored at `key`.
    ///
    /// Missing keys start at zero. Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] if the stored value is not a counter.
    pub fn increment(&self, key: &str, delta: u64) -> Result<u64> {
        self.host
            .kv_increment(self.bucket, key, delta)
            .map_err(Error::key_value)
    }

    /// One page of keys starting at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn list_keys(&self, cursor: Option<u64>) -> Result<KeyPage> {
        self.host
            .kv_list_keys(self.bucket, cursor)
            .map_err(Error::key_value)
    }

    /// Fetch several keys. The result is aligned with `keys`; missing keys
    /// yield `None` at their position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure, or if the host answers
    /// with a list that does not line up with `keys`.
    #[allow(clippy::type_complexity)]
    pub fn get_many(&self, keys: &[String]) -> Result<Vec<Option<(String, Vec<u8>)>>> {
        let values = self
            .host
            .kv_get_many(self.bucket, keys)
            .map_err(Error::key_value)?;
        if values.len() != keys.len() {
            return Err(Error::KeyValue(format!(
                "get_many returned {} entries for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    /// Store several pairs. Not atomic: on error, pairs the host already
    /// applied stay applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn set_many(&self, pairs: &[(String, Vec<u8>)]) -> Result<()> {
        self.host
            .kv_set_many(self.bucket, pairs)
            .map_err(Error::key_value)
    }

    /// Delete several keys. Not atomic, see [`Store::set_many`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyValue`] on host failure.
    pub fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.host
            .kv_delete_many(self.bucket, keys)
            .map_err(Error::key_value)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::testing::MemoryHost;

    fn store() -> (Arc<MemoryHost>, Store) {
        let host = Arc::new(MemoryHost::new());
        let store = Store::open_with(host.clone(), DEFAULT_BUCKET).unwrap();
        (host, store)
    }

    #[test]
    fn single_key_lifecycle() {
        let (_, store) = store();
        assert!(!store.exists("k").unwrap());
        store.set("k", b"v1").unwrap();
        assert!(store.exists("k").unwrap());
        assert_eq!(store.get("k").unwrap(), Some(b"v1".to_vec()));
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.delete("k").unwrap();
    }

    #[test]
    fn open_is_idempotent() {
        let host = Arc::new(MemoryHost::new());
        let a = Store::open_with(host.clone(), DEFAULT_BUCKET).unwrap();
        let b = Store::open_with(host, DEFAULT_BUCKET).unwrap();
        a.set("shared", b"1").unwrap();
        assert_eq!(b.get("shared").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn unknown_bucket_is_rejected() {
        let host = Arc::new(MemoryHost::new());
        let err = Store::open_with(host, "missing").unwrap_err();
        assert!(matches!(err, Error::KeyValue(msg) if msg.contains("no such store")));
    }

    #[test]
    fn get_many_is_aligned_with_input() {
        let (_, store) = store();
        store.set("a", b"1").unwrap();
        store.set("c", b"3").unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let got = store.get_many(&keys).unwrap();
        assert_eq!(
            got,
            vec![
                Some(("a".to_string(), b"1".to_vec())),
                None,
                Some(("c".to_string(), b"3".to_vec())),
            ]
        );
    }

    #[test]
    fn set_many_is_not_atomic() {
        let (host, store) = store();
        host.fail_kv_writes_after(1);

        let pairs = vec![
            ("first".to_string(), b"1".to_vec()),
            ("second".to_string(), b"2".to_vec()),
        ];
        let err = store.set_many(&pairs).unwrap_err();
        assert!(matches!(err, Error::KeyValue(_)));

        host.clear_faults();
        assert_eq!(store.get("first").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("second").unwrap(), None);
    }

    #[test]
    fn delete_many_is_not_atomic() {
        let (host, store) = store();
        store.set("x", b"1").unwrap();
        store.set("y", b"2").unwrap();
        host.fail_kv_writes_after(1);

        let keys = vec!["x".to_string(), "y".to_string()];
        assert!(store.delete_many(&keys).is_err());

        host.clear_faults();
        assert!(!store.exists("x").unwrap());
        assert!(store.exists("y").unwrap());
    }

    #[test]
    fn increment_counts_from_zero() {
        let (_, store) = store();
        assert_eq!(store.increment("hits", 2).unwrap(), 2);
        assert_eq!(store.increment("hits", 3).unwrap(), 5);
        assert_eq!(store.get("hits").unwrap(), Some(b"5".to_vec()));

        store.set("blob", &[0xff]).unwrap();
        assert!(store.increment("blob", 1).is_err());
    }

    #[test]
    fn list_keys_pages_in_order() {
        let (_, store) = store();
        for key in ["b", "a", "c"] {
            store.set(key, b"").unwrap();
        }
        let page = store.list_keys(None).unwrap();
        assert_eq!(page.keys, vec!["a", "b", "c"]);
        assert_eq!(page.cursor, None);

        let page = store.list_keys(Some(2)).unwrap();
        assert_eq!(page.keys, vec!["c"]);
    }

    #[test]
    fn cancellation_surfaces_as_cancelled() {
        let (host, store) = store();
        host.cancel();
        assert!(matches!(store.get("k"), Err(Error::Cancelled)));
    }
}
