mod common;

use aipm::core::error::AipmError;
use aipm::core::store::StateStore;
use common::{FakeGit, workspace};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

#[test]
fn contending_begin_times_out_within_bound() {
    let (dir, git, store_a) = workspace();
    store_a.initialize().expect("initialize");
    let store_b = StateStore::open(dir.path(), Box::new(git.clone()))
        .with_lock_timeout(Duration::from_secs(1));

    let _held = store_a.begin("holder").expect("store A begins");

    let start = Instant::now();
    let err = store_b.begin("contender").unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, AipmError::LockTimeout(_)));
    assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "hung: {elapsed:?}");
}

#[test]
fn second_writer_proceeds_after_first_resolves() {
    let (dir, git, store_a) = workspace();
    store_a.initialize().expect("initialize");
    let store_b = StateStore::open(dir.path(), Box::new(git.clone()))
        .with_lock_timeout(Duration::from_secs(2));

    {
        let mut tx = store_a.begin("first").expect("first begins");
        tx.update("runtime.git.ahead", json!(1)).expect("update");
        tx.commit().expect("first commits");
    }

    let mut tx = store_b.begin("second").expect("second begins after first");
    tx.update("runtime.git.behind", json!(2)).expect("update");
    tx.commit().expect("second commits");

    assert_eq!(store_a.get("runtime.git.ahead").expect("ahead"), json!(1));
    assert_eq!(store_a.get("runtime.git.behind").expect("behind"), json!(2));
}

#[test]
fn concurrent_begins_never_overlap() {
    let (dir, git, setup) = workspace();
    setup.initialize().expect("initialize");
    drop(setup);

    let dir_path = dir.path().to_path_buf();
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();

    for i in 0..2u64 {
        let path = dir_path.clone();
        let gate = Arc::clone(&barrier);
        let git = git.clone();
        handles.push(std::thread::spawn(move || {
            let store = StateStore::open(&path, Box::new(git))
                .with_lock_timeout(Duration::from_secs(5));
            gate.wait();
            let mut tx = store.begin("writer").expect("begin");
            // Hold the lock long enough that overlap would be observable.
            std::thread::sleep(Duration::from_millis(120));
            tx.update(&format!("runtime.git.{}", if i == 0 { "ahead" } else { "behind" }), json!(i + 1))
                .expect("update");
            tx.commit().expect("commit");
        }));
    }

    let started = Instant::now();
    for handle in handles {
        handle.join().expect("writer thread");
    }
    // Two 120 ms critical sections must have serialized.
    assert!(started.elapsed() >= Duration::from_millis(240));

    let store = StateStore::open(&dir_path, Box::new(FakeGit::default()));
    assert_eq!(store.get("runtime.git.ahead").expect("ahead"), json!(1));
    assert_eq!(store.get("runtime.git.behind").expect("behind"), json!(2));
}

#[test]
fn readers_are_never_blocked_by_a_writer() {
    let (dir, git, store) = workspace();
    store.initialize().expect("initialize");
    let reader = StateStore::open(dir.path(), Box::new(git.clone()));

    let mut tx = store.begin("long.writer").expect("begin");
    tx.update("runtime.git.stashCount", json!(7)).expect("update");

    // The write is uncommitted: a lockless reader sees the pre-state
    // immediately, without waiting on the lock.
    let start = Instant::now();
    let observed = reader.get("runtime.git.stashCount").expect("read");
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(observed, json!(0));

    tx.commit().expect("commit");
    assert_eq!(
        reader.get("runtime.git.stashCount").expect("read"),
        json!(7)
    );
}
