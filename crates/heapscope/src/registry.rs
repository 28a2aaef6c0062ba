//! Tag-keyed allocation registry.
//!
//! A hash table from identity to (record, tag, owner thread). Lookup and
//! removal by identity are O(1) on average because single releases recur
//! on every work cycle. The table is process-wide shared state, so every
//! mutation happens under one `parking_lot::Mutex`.
//!
//! Destructors never run while the lock is held: records are removed first
//! and released after the guard is dropped. That keeps "removed before
//! destructed" true and lets a destructor call back into the registry.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::checked;
use crate::config::{LifecycleConfig, ReleaseOrder};
use crate::error::LifecycleError;
use crate::metrics::{LifecycleMetrics, global_metrics};
use crate::record::{AllocationRecord, Destructor, Identity};
use crate::tag::{Tag, TagLifecycle};

/// Result of a single release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The record was found, removed and destructed.
    Released,
    /// Nothing was tracked under that identity; nothing happened.
    NotTracked,
}

struct TagEntry {
    record: AllocationRecord,
    tag: Tag,
    owner: ThreadId,
    /// Registration sequence, used to order bulk releases.
    seq: u64,
}

struct RegistryState {
    entries: HashMap<Identity, TagEntry>,
    next_seq: u64,
}

/// Thread-safe registry of tagged allocations.
pub struct AllocRegistry {
    state: Mutex<RegistryState>,
    order: ReleaseOrder,
}

impl AllocRegistry {
    /// Registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&LifecycleConfig::default())
    }

    /// Registry with explicit configuration. Failing to reserve the initial
    /// capacity is fatal.
    #[must_use]
    pub fn with_config(config: &LifecycleConfig) -> Self {
        Self::try_with_config(config).unwrap_or_else(|err| checked::fatal(&err))
    }

    pub fn try_with_config(config: &LifecycleConfig) -> Result<Self, LifecycleError> {
        let mut entries = HashMap::new();
        entries
            .try_reserve(config.registry_capacity)
            .map_err(|_| LifecycleError::RegistryReserve {
                capacity: config.registry_capacity,
            })?;
        Ok(Self {
            state: Mutex::new(RegistryState {
                entries,
                next_seq: 0,
            }),
            order: config.release_order,
        })
    }

    #[must_use]
    pub const fn release_order(&self) -> ReleaseOrder {
        self.order
    }

    /// View of this registry bound to one tag.
    #[must_use]
    pub const fn tagged(&self, tag: Tag) -> TagLifecycle<'_> {
        TagLifecycle::new(self, tag)
    }

    /// Tracks `ptr` under `tag` for the calling thread. Null is a no-op and
    /// returns null.
    ///
    /// An identity that is already tracked is rejected with
    /// [`LifecycleError::AlreadyTracked`]; the existing record stays in
    /// charge and `destructor` is discarded without running.
    ///
    /// # Safety
    ///
    /// Running `destructor` once on `ptr` must be sound from any thread until
    /// the record is released, and nothing else may release `ptr`.
    pub unsafe fn register_allocation<T>(
        &self,
        ptr: *mut T,
        tag: Tag,
        destructor: Destructor,
    ) -> Result<*mut T, LifecycleError> {
        let Some(identity) = Identity::from_ptr(ptr) else {
            return Ok(ptr);
        };
        // SAFETY: forwarded from the caller's contract.
        let record = unsafe { AllocationRecord::new(identity, destructor) };
        self.register_record(record, tag)?;
        Ok(ptr)
    }

    /// Tracks an existing record under `tag` for the calling thread.
    ///
    /// On [`LifecycleError::AlreadyTracked`] the incoming record is
    /// forgotten: its allocation already belongs to the tracked entry.
    pub fn register_record(
        &self,
        record: AllocationRecord,
        tag: Tag,
    ) -> Result<Identity, LifecycleError> {
        let identity = record.identity();
        let owner = thread::current().id();
        let mut state = self.state.lock();
        if state.entries.contains_key(&identity) {
            drop(state);
            LifecycleMetrics::inc(&global_metrics().duplicate_registrations);
            tracing::warn!(%identity, %tag, "rejecting registration of tracked identity");
            let _ = record.into_parts();
            return Err(LifecycleError::AlreadyTracked(identity));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            identity,
            TagEntry {
                record,
                tag,
                owner,
                seq,
            },
        );
        drop(state);

        LifecycleMetrics::inc(&global_metrics().tag_registrations);
        tracing::trace!(%identity, %tag, "tracked");
        Ok(identity)
    }

    /// Checked allocation tracked under `tag` with the default destructor.
    #[must_use]
    pub fn allocate_tracked(&self, size: usize, tag: Tag) -> NonNull<c_void> {
        let ptr = checked::allocate(size);
        self.track_fresh(ptr, tag);
        ptr
    }

    /// Checked reallocation of a tracked (or untracked) allocation.
    ///
    /// Any record for `ptr` is dropped without running its destructor and
    /// the new address is tracked under `tag` with the default destructor.
    /// Exhaustion is fatal, after releasing the original.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live C-allocator pointer that is not tracked
    /// by any scope, and no other thread may release it concurrently.
    #[must_use]
    pub unsafe fn reallocate_tracked(
        &self,
        ptr: *mut c_void,
        size: usize,
        tag: Tag,
    ) -> NonNull<c_void> {
        if let Some(old) = self.forget(ptr) {
            let _ = old.into_parts();
        }
        // SAFETY: forwarded from the caller's contract; the record is gone so
        // nothing else will release the old address.
        let new_ptr = unsafe { checked::reallocate(ptr, size) };
        self.track_fresh(new_ptr, tag);
        new_ptr
    }

    fn track_fresh(&self, ptr: NonNull<c_void>, tag: Tag) {
        // The allocator just handed out this address, so a record still
        // holding it points at memory that was released behind our back.
        if let Some(stale) = self.forget(ptr.as_ptr()) {
            tracing::warn!(
                identity = %stale.identity(),
                "evicting stale record for reused address"
            );
            let _ = stale.into_parts();
        }
        let Some(identity) = Identity::from_ptr(ptr.as_ptr()) else {
            return;
        };
        // SAFETY: `ptr` came from the checked allocator and nothing else
        // tracks it.
        let record = unsafe { AllocationRecord::new(identity, Destructor::Free) };
        if let Err(err) = self.register_record(record, tag) {
            // Only a concurrent contract violation can land here.
            tracing::error!(error = %err, "fresh allocation raced with another registration");
        }
    }

    /// Releases the record for `ptr`, if any. Untracked identities are a
    /// silent no-op so cleanup paths may be idempotent.
    pub fn release_one<T>(&self, ptr: *mut T) -> ReleaseOutcome {
        match self.forget(ptr) {
            Some(record) => {
                LifecycleMetrics::inc(&global_metrics().tag_releases);
                record.release();
                ReleaseOutcome::Released
            }
            None => {
                LifecycleMetrics::inc(&global_metrics().noop_releases);
                tracing::trace!(addr = ptr.addr(), "release of untracked identity ignored");
                ReleaseOutcome::NotTracked
            }
        }
    }

    /// Stops tracking `ptr` and hands its record back without destructing.
    #[must_use]
    pub fn forget<T>(&self, ptr: *mut T) -> Option<AllocationRecord> {
        let identity = Identity::from_ptr(ptr)?;
        let entry = self.state.lock().entries.remove(&identity)?;
        Some(entry.record)
    }

    /// Releases every record tracked under `tag` by `owner`.
    ///
    /// Matching keys are collected first and removed afterwards, so the
    /// table is never mutated mid-scan. Destructors run after the lock is
    /// released, in the configured order. Returns the number released.
    pub fn release_all_matching(&self, tag: Tag, owner: ThreadId) -> usize {
        let mut batch: Vec<TagEntry> = {
            let mut state = self.state.lock();
            let keys: Vec<Identity> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.tag == tag && entry.owner == owner)
                .map(|(identity, _)| *identity)
                .collect();
            keys.iter()
                .filter_map(|identity| state.entries.remove(identity))
                .collect()
        };
        let released = self.release_batch(&mut batch);

        LifecycleMetrics::inc(&global_metrics().bulk_releases);
        tracing::debug!(%tag, ?owner, released, "released tag");
        released
    }

    /// [`release_all_matching`](Self::release_all_matching) for the calling
    /// thread.
    pub fn release_all_matching_current(&self, tag: Tag) -> usize {
        self.release_all_matching(tag, thread::current().id())
    }

    /// Releases every record regardless of tag or owner (process teardown).
    pub fn release_all(&self) -> usize {
        let mut batch: Vec<TagEntry> = {
            let mut state = self.state.lock();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        let released = self.release_batch(&mut batch);
        if released > 0 {
            tracing::debug!(released, "released all tracked allocations");
        }
        released
    }

    fn release_batch(&self, batch: &mut Vec<TagEntry>) -> usize {
        batch.sort_unstable_by_key(|entry| entry.seq);
        let released = batch.len();
        LifecycleMetrics::add(&global_metrics().tag_releases, released);
        self.order.drain(batch, |entry| entry.record.release());
        released
    }

    #[must_use]
    pub fn contains<T>(&self, ptr: *mut T) -> bool {
        Identity::from_ptr(ptr)
            .is_some_and(|identity| self.state.lock().entries.contains_key(&identity))
    }

    /// Tag `ptr` is tracked under, if any.
    #[must_use]
    pub fn tag_of<T>(&self, ptr: *mut T) -> Option<Tag> {
        let identity = Identity::from_ptr(ptr)?;
        self.state.lock().entries.get(&identity).map(|entry| entry.tag)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AllocRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AllocRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for AllocRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocRegistry")
            .field("tracked", &self.len())
            .field("order", &self.order)
            .finish()
    }
}
