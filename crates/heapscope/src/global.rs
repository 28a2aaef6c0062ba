//! Process-wide tag registry.
//!
//! Built on first use from the environment configuration. Call
//! [`shutdown`] before the process exits to release what is still tracked;
//! the registry itself is never dropped.

#![allow(unsafe_code)]

use std::sync::OnceLock;

use crate::config::config;
use crate::error::LifecycleError;
use crate::record::Destructor;
use crate::registry::{AllocRegistry, ReleaseOutcome};
use crate::scope;
use crate::tag::{Tag, TagLifecycle};

static GLOBAL_REGISTRY: OnceLock<AllocRegistry> = OnceLock::new();

/// The process registry.
#[must_use]
pub fn global() -> &'static AllocRegistry {
    GLOBAL_REGISTRY.get_or_init(|| AllocRegistry::with_config(config()))
}

/// Tracks `ptr` under `tag` in the process registry.
///
/// # Safety
///
/// See [`AllocRegistry::register_allocation`].
pub unsafe fn register_allocation<T>(
    ptr: *mut T,
    tag: Tag,
    destructor: Destructor,
) -> Result<*mut T, LifecycleError> {
    // SAFETY: forwarded from the caller's contract.
    unsafe { global().register_allocation(ptr, tag, destructor) }
}

pub fn release_one<T>(ptr: *mut T) -> ReleaseOutcome {
    global().release_one(ptr)
}

/// Releases everything the calling thread tracked under `tag`.
pub fn release_all_matching(tag: Tag) -> usize {
    global().release_all_matching_current(tag)
}

#[must_use]
pub fn tagged(tag: Tag) -> TagLifecycle<'static> {
    global().tagged(tag)
}

/// Teardown counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub tagged: usize,
    pub scoped: usize,
}

/// Releases every record in the process registry and unwinds the calling
/// thread's scope stack. Other threads' stacks are unwound when they exit.
pub fn shutdown() -> ShutdownReport {
    let report = ShutdownReport {
        tagged: GLOBAL_REGISTRY.get().map_or(0, AllocRegistry::release_all),
        scoped: scope::unwind_thread(),
    };
    tracing::info!(tagged = report.tagged, scoped = report.scoped, "heapscope shut down");
    report
}
