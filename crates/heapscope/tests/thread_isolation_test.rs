//! Per-thread scope stacks: isolation and release at thread exit.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{Ledger, XorShift64};
use heapscope::scope;

#[test]
fn pops_on_one_thread_do_not_touch_another() {
    let ledger = Ledger::new();
    let barrier = Arc::new(Barrier::new(2));

    let holder = {
        let ledger = ledger.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            scope::push().expect("stack available");
            for _ in 0..4 {
                let (ptr, destructor) = ledger.alloc();
                // SAFETY: fresh box, destructor reclaims it exactly once.
                unsafe { scope::register_in_scope(ptr, destructor) }.expect("stack available");
            }
            barrier.wait();
            barrier.wait();
            let depth = scope::depth();
            let released = scope::pop().expect("stack available");
            (depth, released)
        })
    };

    barrier.wait();
    for _ in 0..8 {
        scope::pop().expect("stack available");
    }
    scope::push().expect("stack available");
    assert_eq!(scope::pop().expect("stack available"), 0);
    assert_eq!(ledger.released(), 0);
    barrier.wait();

    let (depth, released) = holder.join().expect("holder");
    assert_eq!(depth, 2);
    assert_eq!(released, 4);
    assert!(ledger.all_exactly_once());
}

#[test]
fn abandoned_frames_are_released_at_thread_exit() {
    let ledger = Ledger::new();
    let worker = {
        let ledger = ledger.clone();
        thread::spawn(move || {
            for _ in 0..3 {
                scope::push().expect("stack available");
                let (ptr, destructor) = ledger.alloc();
                // SAFETY: fresh box, destructor reclaims it exactly once.
                unsafe { scope::register_in_scope(ptr, destructor) }.expect("stack available");
            }
            let _ = scope::allocate_in_scope(1024).expect("stack available");
        })
    };
    worker.join().expect("worker");
    assert_eq!(ledger.allocated(), 3);
    assert!(ledger.all_exactly_once());
}

#[test]
fn many_threads_with_random_nesting() {
    let ledger = Ledger::new();
    let workers: Vec<_> = (0..8_u64)
        .map(|seed| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                let mut rng = XorShift64::new(seed + 1);
                let mut guards = Vec::new();
                for _ in 0..500 {
                    match rng.below(6) {
                        0 => guards.push(scope::enter().expect("stack available")),
                        1 => drop(guards.pop()),
                        2 => {
                            let (ptr, destructor) = ledger.alloc();
                            // SAFETY: fresh box, destructor reclaims it once.
                            unsafe { scope::register_in_scope(ptr, destructor) }
                                .expect("stack available");
                            if let Some(record) = scope::pop_rescue(ptr).expect("stack available") {
                                scope::register_record(record).expect("stack available");
                            }
                        }
                        _ => {
                            let (ptr, destructor) = ledger.alloc();
                            // SAFETY: fresh box, destructor reclaims it once.
                            unsafe { scope::register_in_scope(ptr, destructor) }
                                .expect("stack available");
                        }
                    }
                }
                // Drop the guards oldest first; the first one closes the rest.
                for guard in guards {
                    drop(guard);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker");
    }
    assert!(ledger.allocated() > 0);
    assert!(ledger.all_exactly_once());
}
