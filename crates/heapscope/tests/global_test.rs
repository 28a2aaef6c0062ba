//! Process-wide registry and teardown.
//!
//! Every test here shares `heapscope::global()`, and `shutdown()` clears all
//! of it, so the tests serialize on a guard.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use common::Ledger;
use heapscope::{ReleaseOutcome, ShutdownReport, Tag, global, scope};

static TEST_GUARD_HELD: AtomicBool = AtomicBool::new(false);

struct TestGuard;

impl Drop for TestGuard {
    fn drop(&mut self) {
        TEST_GUARD_HELD.store(false, Ordering::Release);
    }
}

fn acquire_test_guard() -> TestGuard {
    loop {
        if TEST_GUARD_HELD
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return TestGuard;
        }
        std::thread::yield_now();
    }
}

#[test]
fn shutdown_releases_global_records_and_thread_stack() {
    let _guard = acquire_test_guard();
    let ledger = Ledger::new();

    let (a, da) = ledger.alloc();
    let (b, db) = ledger.alloc();
    let (c, dc) = ledger.alloc();
    // SAFETY: fresh boxes, destructors reclaim them exactly once.
    unsafe {
        global::register_allocation(a, Tag::APPLICATION, da).expect("untracked");
        global::tagged(Tag::WORK_CYCLE).register(b, db).expect("untracked");
    }
    scope::push().expect("stack available");
    // SAFETY: fresh box, destructor reclaims it exactly once.
    unsafe { scope::register_in_scope(c, dc) }.expect("stack available");

    assert!(global().contains(a));
    assert_eq!(global().tag_of(b), Some(Tag::WORK_CYCLE));

    let report = heapscope::shutdown();
    assert_eq!(
        report,
        ShutdownReport {
            tagged: 2,
            scoped: 1
        }
    );
    assert!(ledger.all_exactly_once());
    assert!(global().is_empty());
    assert_eq!(scope::depth(), 0);

    assert_eq!(heapscope::shutdown(), ShutdownReport::default());
}

#[test]
fn flat_release_all_matching_is_per_thread() {
    let _guard = acquire_test_guard();
    let ledger = Ledger::new();
    let tag = Tag::new("global-per-thread");

    let (mine, d_mine) = ledger.alloc();
    // SAFETY: fresh box, destructor reclaims it exactly once.
    unsafe { global::register_allocation(mine, tag, d_mine) }.expect("untracked");

    let worker = {
        let ledger = ledger.clone();
        thread::spawn(move || {
            let (theirs, d_theirs) = ledger.alloc();
            // SAFETY: fresh box, destructor reclaims it exactly once.
            unsafe { global::register_allocation(theirs, tag, d_theirs) }.expect("untracked");
            global::release_all_matching(tag)
        })
    };
    assert_eq!(worker.join().expect("worker"), 1);
    assert_eq!(ledger.count(0), 0);
    assert_eq!(ledger.count(1), 1);
    assert!(global().contains(mine));

    assert_eq!(global::release_one(mine), ReleaseOutcome::Released);
    assert_eq!(global::release_one(mine), ReleaseOutcome::NotTracked);
    assert_eq!(global::release_all_matching(tag), 0);
    assert!(ledger.all_exactly_once());
}
