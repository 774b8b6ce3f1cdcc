use orgplus_core::{NewUnit, OrgError, Store};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

#[test]
fn test_concurrent_duplicate_creates_cannot_both_succeed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orgplus.db");
    // Initialise the schema before racing
    Store::open(&path).unwrap().close().unwrap();

    for round in 0..10 {
        let code = format!("RACE{}", round);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                let code = code.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store = Store::open(&path).unwrap();
                    barrier.wait();
                    store.create_unit(&NewUnit::new(code, "Concorrente"))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "round {}", round);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(OrgError::DuplicateKey { entity: "unit", .. }))));
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.list_units(false).unwrap().len(), 10);
}

#[test]
fn test_shared_handle_serialises_writers() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.create_unit(&NewUnit::new("SHARED", "")).is_ok())
        })
        .collect();

    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(created, 1);
}
