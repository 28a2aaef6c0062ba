//! Tag mode: coarse lifetime labels released in bulk.
//!
//! A [`TagLifecycle`] binds a registry to one [`Tag`] and exposes the
//! allocate-and-tag pattern for state whose lifetime follows an external
//! event (for example one work cycle) rather than call nesting. Call sites
//! should pick either tag mode or scope mode for one logical operation, not
//! both.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::error::LifecycleError;
use crate::record::{AllocationRecord, Destructor, Identity};
use crate::registry::{AllocRegistry, ReleaseOutcome};

/// Coarse lifetime label independent of call nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(&'static str);

impl Tag {
    /// Lives until the process shuts down.
    pub const APPLICATION: Self = Self::new("application");
    /// Lives until the current externally triggered work cycle ends.
    pub const WORK_CYCLE: Self = Self::new("work_cycle");

    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A registry viewed through one tag.
#[derive(Debug, Clone, Copy)]
pub struct TagLifecycle<'r> {
    registry: &'r AllocRegistry,
    tag: Tag,
}

impl<'r> TagLifecycle<'r> {
    #[must_use]
    pub const fn new(registry: &'r AllocRegistry, tag: Tag) -> Self {
        Self { registry, tag }
    }

    #[must_use]
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    #[must_use]
    pub const fn registry(&self) -> &'r AllocRegistry {
        self.registry
    }

    /// Checked allocation tracked under this tag.
    #[must_use]
    pub fn allocate(&self, size: usize) -> NonNull<c_void> {
        self.registry.allocate_tracked(size, self.tag)
    }

    /// Checked reallocation; the record follows the new address.
    ///
    /// # Safety
    ///
    /// See [`AllocRegistry::reallocate_tracked`].
    #[must_use]
    pub unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> NonNull<c_void> {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.registry.reallocate_tracked(ptr, size, self.tag) }
    }

    /// Tracks a boxed value under this tag and returns its address.
    pub fn adopt<T: Send + 'static>(&self, value: Box<T>) -> Result<*mut T, LifecycleError> {
        let record = AllocationRecord::from_box(value);
        let ptr = record.identity().as_ptr().cast::<T>();
        self.registry.register_record(record, self.tag)?;
        Ok(ptr)
    }

    /// Tracks `ptr` under this tag.
    ///
    /// # Safety
    ///
    /// See [`AllocRegistry::register_allocation`].
    pub unsafe fn register<T>(
        &self,
        ptr: *mut T,
        destructor: Destructor,
    ) -> Result<*mut T, LifecycleError> {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.registry.register_allocation(ptr, self.tag, destructor) }
    }

    /// Re-registers a record (for example one rescued from a scope).
    pub fn register_record(&self, record: AllocationRecord) -> Result<Identity, LifecycleError> {
        self.registry.register_record(record, self.tag)
    }

    pub fn release_one<T>(&self, ptr: *mut T) -> ReleaseOutcome {
        self.registry.release_one(ptr)
    }

    /// Releases everything the calling thread tracked under this tag.
    pub fn release(&self) -> usize {
        self.registry.release_all_matching_current(self.tag)
    }

    /// Runs one unit of work, then releases the tag.
    ///
    /// The release also happens if `work` panics.
    pub fn run_cycle<R>(&self, work: impl FnOnce(&Self) -> R) -> R {
        let cycle = CycleGuard(self);
        work(cycle.0)
    }
}

struct CycleGuard<'a, 'r>(&'a TagLifecycle<'r>);

impl Drop for CycleGuard<'_, '_> {
    fn drop(&mut self) {
        let released = self.0.release();
        tracing::debug!(tag = %self.0.tag, released, "work cycle finished");
    }
}
