use std::sync::Arc;

use portico_sdk::kv::Store;
use portico_sdk::testing::MemoryHost;
use portico_sdk::Error;

fn pairs() -> Vec<(String, Vec<u8>)> {
    vec![
        ("first".to_string(), b"1".to_vec()),
        ("second".to_string(), b"2".to_vec()),
    ]
}

#[test]
fn failed_batch_keeps_applied_pairs() {
    let host = Arc::new(MemoryHost::new());
    let store = Store::open_with(host.clone(), "").unwrap();

    host.fail_kv_writes_after(1);
    let err = store.set_many(&pairs()).unwrap_err();
    assert!(matches!(err, Error::KeyValue(_)));
    host.clear_faults();

    assert_eq!(store.get("first").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get("second").unwrap(), None);
    assert!(!store.exists("second").unwrap());
}

#[test]
fn successful_batch_is_visible_to_get_many() {
    let host = Arc::new(MemoryHost::new());
    let store = Store::open_with(host, "").unwrap();
    store.set_many(&pairs()).unwrap();

    let keys = vec!["second".to_string(), "third".to_string(), "first".to_string()];
    let got = store.get_many(&keys).unwrap();
    assert_eq!(got[0], Some(("second".to_string(), b"2".to_vec())));
    assert_eq!(got[1], None);
    assert_eq!(got[2], Some(("first".to_string(), b"1".to_vec())));

    store.delete_many(&keys).unwrap();
    assert!(store.get_many(&keys).unwrap().iter().all(Option::is_none));
}

#[test]
fn named_buckets_are_isolated() {
    let host = Arc::new(MemoryHost::new());
    host.add_bucket("sessions");
    let default = Store::open_with(host.clone(), "").unwrap();
    let sessions = Store::open_with(host, "sessions").unwrap();

    sessions.set("token", b"abc").unwrap();
    assert_eq!(default.get("token").unwrap(), None);
    assert_eq!(sessions.get("token").unwrap(), Some(b"abc".to_vec()));
}
