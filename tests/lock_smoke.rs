// Multi-process lock smoke tests for write serialization and busy reporting.
use std::process::{Command, Stdio};
use std::time::Duration;

use recstore::api::{Store, StoreOptions};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_recstore");
    Command::new(exe)
}

#[test]
fn concurrent_puts_are_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store_dir = temp.path().join("stores");

    let create = cmd()
        .args(["--dir", store_dir.to_str().unwrap(), "init", "lockstore"])
        .output()
        .expect("init");
    assert!(create.status.success());

    let workers = 8;
    let mut children = Vec::new();
    for i in 0..workers {
        let child = cmd()
            .args([
                "--dir",
                store_dir.to_str().unwrap(),
                "--wait-ms",
                "30000",
                "put",
                "lockstore",
                "counter",
                &format!("{{\"i\":{i}}}"),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    let mut succeeded = 0u64;
    for mut child in children {
        let status = child.wait().expect("wait");
        match status.code() {
            Some(0) => succeeded += 1,
            Some(5) => {}
            other => panic!("unexpected exit status {other:?}"),
        }
    }
    assert!(succeeded > 0);

    let store_path = store_dir.join("lockstore.recstore");
    let store = Store::open(&store_path, StoreOptions::default()).expect("open");
    let record = store.get("counter").expect("counter");
    assert_eq!(record.version(), succeeded);
    assert_eq!(store.seq(), succeeded);
}

#[test]
fn live_store_reports_busy() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store_path = temp.path().join("held");
    let store = Store::create(&store_path, StoreOptions::default()).expect("create");

    let out = cmd()
        .args([
            "--wait-ms",
            "50",
            "put",
            store_path.to_str().unwrap(),
            "a",
            "{}",
        ])
        .output()
        .expect("put");
    assert_eq!(out.status.code(), Some(5));

    store.close().expect("close");
    let out = cmd()
        .args(["put", store_path.to_str().unwrap(), "a", "{}"])
        .output()
        .expect("put");
    assert!(out.status.success());
}

#[test]
fn lock_wait_outlasts_a_short_holder() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store_path = temp.path().join("held");
    let store = Store::create(&store_path, StoreOptions::default()).expect("create");

    let child = cmd()
        .args([
            "--wait-ms",
            "30000",
            "put",
            store_path.to_str().unwrap(),
            "a",
            "{}",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn");
    std::thread::sleep(Duration::from_millis(200));
    store.close().expect("close");

    let status = child.wait_with_output().expect("wait").status;
    assert!(status.success());
}
