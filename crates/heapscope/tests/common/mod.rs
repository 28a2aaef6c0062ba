//! Shared fixtures: boxed values whose destructors are counted per
//! allocation, so address reuse cannot hide a double release.

#![allow(dead_code)]

use std::sync::Arc;

use heapscope::Destructor;
use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct Ledger {
    counts: Arc<Mutex<Vec<u32>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh boxed value and the destructor that reclaims it.
    pub fn alloc(&self) -> (*mut u64, Destructor) {
        let serial = {
            let mut counts = self.counts.lock();
            counts.push(0);
            counts.len() - 1
        };
        let ptr = Box::into_raw(Box::new(serial as u64));
        let ledger = self.clone();
        let destructor = Destructor::closure(move |raw| {
            // SAFETY: `raw` is the Box::into_raw pointer created above and
            // the destructor runs at most once.
            let value = unsafe { Box::from_raw(raw.cast::<u64>()) };
            ledger.counts.lock()[*value as usize] += 1;
        });
        (ptr, destructor)
    }

    pub fn serial(ptr: *mut u64) -> usize {
        // SAFETY: only called while the value is still live.
        unsafe { *ptr as usize }
    }

    pub fn count(&self, serial: usize) -> u32 {
        self.counts.lock()[serial]
    }

    pub fn allocated(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn released(&self) -> usize {
        self.counts.lock().iter().filter(|&&c| c > 0).count()
    }

    /// Every allocation was destructed once and only once.
    pub fn all_exactly_once(&self) -> bool {
        self.counts.lock().iter().all(|&c| c == 1)
    }

    pub fn none_more_than_once(&self) -> bool {
        self.counts.lock().iter().all(|&c| c <= 1)
    }
}

/// Small deterministic PRNG for reproducible operation sequences.
pub struct XorShift64(u64);

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
