//! Atomic counters for lifecycle observability.
//!
//! All counters use relaxed ordering. They are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide lifecycle counters.
#[derive(Debug)]
pub struct LifecycleMetrics {
    /// Records registered in a scope frame.
    pub scope_registrations: AtomicU64,
    /// Records registered under a tag.
    pub tag_registrations: AtomicU64,
    /// Destructors run by frame pops and thread unwinds.
    pub scope_releases: AtomicU64,
    /// Destructors run by tag releases (single and bulk).
    pub tag_releases: AtomicU64,
    /// Frames pushed.
    pub frames_pushed: AtomicU64,
    /// Frames popped (including rescues and unwinds).
    pub frames_popped: AtomicU64,
    /// Rescues that found their record.
    pub rescues: AtomicU64,
    /// Rescues whose identity was absent from the frame.
    pub rescue_misses: AtomicU64,
    /// Bulk tag releases performed.
    pub bulk_releases: AtomicU64,
    /// Single releases of identities that were not tracked.
    pub noop_releases: AtomicU64,
    /// Registrations rejected because the identity was already tracked.
    pub duplicate_registrations: AtomicU64,
    /// Scope stacks dropped with frames still open.
    pub thread_unwinds: AtomicU64,
    /// Fatal exits taken.
    pub fatal_exits: AtomicU64,
}

impl LifecycleMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scope_registrations: AtomicU64::new(0),
            tag_registrations: AtomicU64::new(0),
            scope_releases: AtomicU64::new(0),
            tag_releases: AtomicU64::new(0),
            frames_pushed: AtomicU64::new(0),
            frames_popped: AtomicU64::new(0),
            rescues: AtomicU64::new(0),
            rescue_misses: AtomicU64::new(0),
            bulk_releases: AtomicU64::new(0),
            noop_releases: AtomicU64::new(0),
            duplicate_registrations: AtomicU64::new(0),
            thread_unwinds: AtomicU64::new(0),
            fatal_exits: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scope_registrations: Self::get(&self.scope_registrations),
            tag_registrations: Self::get(&self.tag_registrations),
            scope_releases: Self::get(&self.scope_releases),
            tag_releases: Self::get(&self.tag_releases),
            frames_pushed: Self::get(&self.frames_pushed),
            frames_popped: Self::get(&self.frames_popped),
            rescues: Self::get(&self.rescues),
            rescue_misses: Self::get(&self.rescue_misses),
            bulk_releases: Self::get(&self.bulk_releases),
            noop_releases: Self::get(&self.noop_releases),
            duplicate_registrations: Self::get(&self.duplicate_registrations),
            thread_unwinds: Self::get(&self.thread_unwinds),
            fatal_exits: Self::get(&self.fatal_exits),
        }
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub scope_registrations: u64,
    pub tag_registrations: u64,
    pub scope_releases: u64,
    pub tag_releases: u64,
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub rescues: u64,
    pub rescue_misses: u64,
    pub bulk_releases: u64,
    pub noop_releases: u64,
    pub duplicate_registrations: u64,
    pub thread_unwinds: u64,
    pub fatal_exits: u64,
}

impl MetricsSnapshot {
    /// Counter-wise difference `self - earlier`, saturating at zero.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            scope_registrations: self
                .scope_registrations
                .saturating_sub(earlier.scope_registrations),
            tag_registrations: self.tag_registrations.saturating_sub(earlier.tag_registrations),
            scope_releases: self.scope_releases.saturating_sub(earlier.scope_releases),
            tag_releases: self.tag_releases.saturating_sub(earlier.tag_releases),
            frames_pushed: self.frames_pushed.saturating_sub(earlier.frames_pushed),
            frames_popped: self.frames_popped.saturating_sub(earlier.frames_popped),
            rescues: self.rescues.saturating_sub(earlier.rescues),
            rescue_misses: self.rescue_misses.saturating_sub(earlier.rescue_misses),
            bulk_releases: self.bulk_releases.saturating_sub(earlier.bulk_releases),
            noop_releases: self.noop_releases.saturating_sub(earlier.noop_releases),
            duplicate_registrations: self
                .duplicate_registrations
                .saturating_sub(earlier.duplicate_registrations),
            thread_unwinds: self.thread_unwinds.saturating_sub(earlier.thread_unwinds),
            fatal_exits: self.fatal_exits.saturating_sub(earlier.fatal_exits),
        }
    }
}

/// Global metrics instance.
static GLOBAL_METRICS: LifecycleMetrics = LifecycleMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static LifecycleMetrics {
    &GLOBAL_METRICS
}
