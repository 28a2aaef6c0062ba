//! Frames and the stack that owns them.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::checked;
use crate::config::{ReleaseOrder, config};
use crate::metrics::{LifecycleMetrics, global_metrics};
use crate::record::{AllocationRecord, Destructor, Identity};

/// Identifier of one frame, unique within its stack and increasing with
/// every push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) const BASE: Self = Self(0);

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Records accumulated between one push and its matching pop.
///
/// Dropping a frame releases every record it still holds.
pub struct Frame {
    id: FrameId,
    records: Vec<AllocationRecord>,
    order: ReleaseOrder,
}

impl Frame {
    fn new(id: FrameId, order: ReleaseOrder) -> Self {
        Self {
            id,
            records: Vec::new(),
            order,
        }
    }

    #[must_use]
    pub const fn id(&self) -> FrameId {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.records.iter().any(|r| r.identity() == identity)
    }

    /// Releases every record. Returns how many were released.
    pub fn release(self) -> usize {
        let released = self.len();
        drop(self);
        released
    }

    /// Removes the record for `identity` (the most recent one, if the
    /// contract was broken and there are several) and releases the rest.
    #[must_use]
    pub fn rescue(mut self, identity: Identity) -> Option<AllocationRecord> {
        let rescued = self
            .records
            .iter()
            .rposition(|r| r.identity() == identity)
            .map(|idx| self.records.remove(idx));
        drop(self);
        rescued
    }

    fn release_records(&mut self) {
        LifecycleMetrics::add(&global_metrics().scope_releases, self.records.len());
        self.order.drain(&mut self.records, AllocationRecord::release);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_records();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("records", &self.records.len())
            .finish()
    }
}

/// Stack of frames owned by a single thread.
///
/// A new stack starts with one base frame, so registrations made before any
/// explicit push still have an owner. Dropping the stack releases every
/// frame, top first.
pub struct ScopeStack {
    frames: Vec<Frame>,
    next_id: FrameId,
    order: ReleaseOrder,
    _not_send: PhantomData<*const ()>,
}

impl ScopeStack {
    /// Stack using the process release order.
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(config().release_order)
    }

    #[must_use]
    pub fn with_order(order: ReleaseOrder) -> Self {
        let mut stack = Self {
            frames: Vec::new(),
            next_id: FrameId::BASE,
            order,
            _not_send: PhantomData,
        };
        stack.push();
        stack
    }

    #[must_use]
    pub const fn release_order(&self) -> ReleaseOrder {
        self.order
    }

    /// Opens a new empty frame on top.
    pub fn push(&mut self) -> FrameId {
        let id = self.next_id;
        self.next_id = id.next();
        self.frames.push(Frame::new(id, self.order));
        LifecycleMetrics::inc(&global_metrics().frames_pushed);
        tracing::trace!(frame = %id, depth = self.frames.len(), "pushed");
        id
    }

    fn top_frame(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            tracing::debug!("registration with no open frame, re-establishing base frame");
            self.push();
        }
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    /// Attaches `ptr` to the top frame. Null is a no-op and returns null.
    ///
    /// # Safety
    ///
    /// Running `destructor` once on `ptr` must be sound until the frame is
    /// released, and `ptr` must not be tracked by any other frame or
    /// registry.
    pub unsafe fn register<T>(&mut self, ptr: *mut T, destructor: Destructor) -> *mut T {
        let Some(identity) = Identity::from_ptr(ptr) else {
            return ptr;
        };
        // SAFETY: forwarded from the caller's contract.
        let record = unsafe { AllocationRecord::new(identity, destructor) };
        self.register_record(record);
        ptr
    }

    /// Attaches an existing record (typically one rescued from a child
    /// frame) to the top frame.
    pub fn register_record(&mut self, record: AllocationRecord) -> Identity {
        let identity = record.identity();
        let frame = self.top_frame();
        frame.records.push(record);
        LifecycleMetrics::inc(&global_metrics().scope_registrations);
        tracing::trace!(%identity, frame = %frame.id, "registered in scope");
        identity
    }

    /// Attaches a boxed value to the top frame and returns its address.
    pub fn adopt<T: Send + 'static>(&mut self, value: Box<T>) -> *mut T {
        let record = AllocationRecord::from_box(value);
        self.register_record(record).as_ptr().cast()
    }

    /// Checked allocation owned by the top frame.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> NonNull<c_void> {
        let ptr = checked::allocate(size);
        // SAFETY: fresh allocation from the checked allocator.
        unsafe { self.register(ptr.as_ptr(), Destructor::Free) };
        ptr
    }

    /// Detaches the top frame without releasing it.
    #[must_use]
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        LifecycleMetrics::inc(&global_metrics().frames_popped);
        Some(frame)
    }

    /// Releases the top frame. Returns how many records were released;
    /// popping an empty stack releases nothing.
    pub fn pop(&mut self) -> usize {
        match self.pop_frame() {
            Some(frame) => release_frame(frame),
            None => {
                tracing::warn!("pop on an empty scope stack");
                0
            }
        }
    }

    /// Pops the top frame, releasing everything except the record for
    /// `ptr`, which is handed back untouched. `None` means nothing matched;
    /// the frame is fully released either way.
    #[must_use]
    pub fn pop_rescue<T>(&mut self, ptr: *mut T) -> Option<AllocationRecord> {
        match self.pop_frame() {
            Some(frame) => rescue_from(frame, ptr),
            None => {
                tracing::warn!("rescue on an empty scope stack");
                None
            }
        }
    }

    /// Detaches `id` and every frame above it, bottom first.
    pub(crate) fn detach_from(&mut self, id: FrameId) -> Vec<Frame> {
        let Some(pos) = self.frames.iter().position(|frame| frame.id >= id) else {
            return Vec::new();
        };
        let detached = self.frames.split_off(pos);
        LifecycleMetrics::add(&global_metrics().frames_popped, detached.len());
        detached
    }

    /// Releases `id` and every frame left open above it.
    pub fn pop_through(&mut self, id: FrameId) -> usize {
        let frames = self.detach_from(id);
        release_frames(frames)
    }

    /// Opens a frame that is popped when the returned guard drops, including
    /// during unwinding.
    pub fn scope(&mut self) -> FrameScope<'_> {
        let frame = self.push();
        FrameScope { stack: self, frame }
    }

    /// Runs `operation` inside its own frame.
    pub fn scoped<R>(&mut self, operation: impl FnOnce(&mut Self) -> R) -> R {
        let mut scope = self.scope();
        operation(&mut scope)
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Records held across all frames.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }

    /// Whether frame `id` is still open.
    #[must_use]
    pub fn holds(&self, id: FrameId) -> bool {
        self.frames.iter().any(|frame| frame.id == id)
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<FrameId> {
        self.frames.last().map(Frame::id)
    }

    /// Releases every frame, top first.
    pub fn unwind(&mut self) -> usize {
        let frames = std::mem::take(&mut self.frames);
        LifecycleMetrics::add(&global_metrics().frames_popped, frames.len());
        release_frames(frames)
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        let released = self.unwind();
        if released > 0 {
            LifecycleMetrics::inc(&global_metrics().thread_unwinds);
            tracing::debug!(released, "scope stack dropped with live records");
        }
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStack")
            .field("frames", &self.frames)
            .field("order", &self.order)
            .finish()
    }
}

pub(crate) fn release_frame(frame: Frame) -> usize {
    let id = frame.id();
    let released = frame.release();
    tracing::debug!(frame = %id, released, "popped");
    released
}

/// Releases frames detached bottom-first, top first.
pub(crate) fn release_frames(frames: Vec<Frame>) -> usize {
    frames.into_iter().rev().map(release_frame).sum()
}

pub(crate) fn rescue_from<T>(frame: Frame, ptr: *mut T) -> Option<AllocationRecord> {
    let id = frame.id();
    let rescued = match Identity::from_ptr(ptr) {
        Some(identity) => frame.rescue(identity),
        None => {
            frame.release();
            None
        }
    };
    match &rescued {
        Some(record) => {
            LifecycleMetrics::inc(&global_metrics().rescues);
            tracing::debug!(frame = %id, identity = %record.identity(), "rescued");
        }
        None => {
            LifecycleMetrics::inc(&global_metrics().rescue_misses);
            tracing::debug!(frame = %id, addr = ptr.addr(), "nothing to rescue, frame released");
        }
    }
    rescued
}

/// Guard over one frame of a [`ScopeStack`].
///
/// Derefs to the stack, so registrations made through it land in the
/// guarded frame (or frames pushed above it). Dropping the guard releases
/// the guarded frame and anything left open above it.
pub struct FrameScope<'s> {
    stack: &'s mut ScopeStack,
    frame: FrameId,
}

impl FrameScope<'_> {
    #[must_use]
    pub const fn frame(&self) -> FrameId {
        self.frame
    }

    /// Closes the guarded frame, keeping the record for `ptr` alive and
    /// handing it to the caller. If the frame was already popped nothing is
    /// released and `None` is returned.
    #[must_use]
    pub fn rescue<T>(self, ptr: *mut T) -> Option<AllocationRecord> {
        let mut this = ManuallyDrop::new(self);
        let frame = this.frame;
        let stack: &mut ScopeStack = &mut this.stack;
        if !stack.holds(frame) {
            return None;
        }
        stack.pop_through(frame.next());
        stack.pop_rescue(ptr)
    }
}

impl Deref for FrameScope<'_> {
    type Target = ScopeStack;

    fn deref(&self) -> &ScopeStack {
        self.stack
    }
}

impl DerefMut for FrameScope<'_> {
    fn deref_mut(&mut self) -> &mut ScopeStack {
        self.stack
    }
}

impl Drop for FrameScope<'_> {
    fn drop(&mut self) {
        // Frames pushed after ours was popped belong to someone else.
        if self.stack.holds(self.frame) {
            self.stack.pop_through(self.frame);
        }
    }
}

impl fmt::Debug for FrameScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScope").field("frame", &self.frame).finish()
    }
}
