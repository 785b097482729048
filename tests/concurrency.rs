// Thread-level concurrency tests against one shared store handle.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use recstore::api::{Store, StoreOptions};
use serde_json::json;

fn store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::create(dir.path().join("s"), StoreOptions::default()).expect("create");
    (dir, Arc::new(store))
}

#[test]
fn same_id_puts_end_at_put_count() {
    let (_dir, store) = store();
    let threads = 8;
    let per_thread = 20;

    let handles = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut last = 0;
                for i in 0..per_thread {
                    let version = store.put("shared", &json!({"t": t, "i": i})).expect("put");
                    assert!(version > last, "versions increase within a thread");
                    last = version;
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("join");
    }

    let record = store.get("shared").expect("get");
    assert_eq!(record.version(), threads * per_thread);
    assert_eq!(store.seq(), threads * per_thread);
}

#[test]
fn distinct_ids_do_not_interfere() {
    let (dir, store) = store();
    let handles = (0..6)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    store.put(&format!("t{t}"), &json!({"i": i})).expect("put");
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("join");
    }
    assert_eq!(store.len(), 6);
    for t in 0..6 {
        let record = store.get(&format!("t{t}")).expect("get");
        assert_eq!(record.version(), 10);
        assert_eq!(record.data()["i"], 9);
    }

    store.close().expect("close");
    let reopened = Store::open(dir.path().join("s"), StoreOptions::default()).expect("reopen");
    assert_eq!(reopened.len(), 6);
    assert_eq!(reopened.seq(), 60);
}

#[test]
fn readers_see_only_committed_states() {
    let (_dir, store) = store();
    store.put("a", &json!({"n": 0})).expect("seed");
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for n in 1..=100 {
                store.put("a", &json!({"n": n})).expect("put");
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers = (0..3)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_seq = 0;
                while !done.load(Ordering::SeqCst) {
                    let snapshot = store.snapshot().expect("snapshot");
                    assert!(snapshot.seq() >= last_seq);
                    last_seq = snapshot.seq();
                    let record = snapshot.get("a").expect("present");
                    // Version n carries payload n - 1.
                    assert_eq!(record.data()["n"], record.version() - 1);

                    let direct = store.get("a").expect("get");
                    assert_eq!(direct.data()["n"], direct.version() - 1);
                }
            })
        })
        .collect::<Vec<_>>();

    writer.join().expect("writer");
    for reader in readers {
        reader.join().expect("reader");
    }
    assert_eq!(store.get("a").expect("get").version(), 101);
}
