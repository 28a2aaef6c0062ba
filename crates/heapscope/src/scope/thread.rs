//! The calling thread's scope stack.
//!
//! Each thread lazily gets its own [`ScopeStack`]; no other thread can reach
//! it. When the thread exits, the stack is dropped and every frame still open
//! is released. Destructors always run after the thread-local borrow ends,
//! so a destructor may itself push, register or pop.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use super::stack::{FrameId, ScopeStack, release_frame, release_frames, rescue_from};
use crate::checked;
use crate::error::LifecycleError;
use crate::record::{AllocationRecord, Destructor, Identity};

thread_local! {
    static THREAD_STACK: RefCell<Option<ScopeStack>> = const { RefCell::new(None) };
}

fn with_thread_stack<R>(f: impl FnOnce(&mut ScopeStack) -> R) -> Result<R, LifecycleError> {
    THREAD_STACK
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().map_err(|_| {
                LifecycleError::StackUnavailable("scope stack is busy on this thread")
            })?;
            Ok(f(slot.get_or_insert_with(ScopeStack::new)))
        })
        .map_err(|_| LifecycleError::StackUnavailable("thread is shutting down"))?
}

/// Opens a new frame on the calling thread.
pub fn push() -> Result<FrameId, LifecycleError> {
    with_thread_stack(ScopeStack::push)
}

/// Releases the calling thread's top frame. Returns how many records were
/// released; popping an empty stack releases nothing.
pub fn pop() -> Result<usize, LifecycleError> {
    let frame = with_thread_stack(ScopeStack::pop_frame)?;
    Ok(match frame {
        Some(frame) => release_frame(frame),
        None => {
            tracing::warn!("pop on an empty scope stack");
            0
        }
    })
}

/// Tracks `ptr` in the calling thread's top frame. Null is a no-op and
/// returns null.
///
/// If the stack is unavailable the record is released immediately and the
/// error is returned.
///
/// # Safety
///
/// Running `destructor` once on `ptr` must be sound until the frame is
/// released, and `ptr` must not be tracked anywhere else.
pub unsafe fn register_in_scope<T>(
    ptr: *mut T,
    destructor: Destructor,
) -> Result<*mut T, LifecycleError> {
    let Some(identity) = Identity::from_ptr(ptr) else {
        return Ok(ptr);
    };
    // SAFETY: forwarded from the caller's contract.
    let record = unsafe { AllocationRecord::new(identity, destructor) };
    register_record(record)?;
    Ok(ptr)
}

/// Tracks an existing record in the calling thread's top frame.
pub fn register_record(record: AllocationRecord) -> Result<Identity, LifecycleError> {
    with_thread_stack(move |stack| stack.register_record(record)).inspect_err(|err| {
        tracing::warn!(%err, "record released without a frame");
    })
}

/// Tracks a boxed value in the calling thread's top frame.
pub fn adopt<T: Send + 'static>(value: Box<T>) -> Result<*mut T, LifecycleError> {
    let record = AllocationRecord::from_box(value);
    register_record(record).map(|identity| identity.as_ptr().cast())
}

/// Checked allocation owned by the calling thread's top frame.
pub fn allocate_in_scope(size: usize) -> Result<NonNull<c_void>, LifecycleError> {
    let ptr = checked::allocate(size);
    // SAFETY: fresh allocation from the checked allocator.
    unsafe { register_in_scope(ptr.as_ptr(), Destructor::Free) }?;
    Ok(ptr)
}

/// Pops the calling thread's top frame, handing back the record for `ptr`
/// and releasing the rest.
pub fn pop_rescue<T>(ptr: *mut T) -> Result<Option<AllocationRecord>, LifecycleError> {
    let frame = with_thread_stack(ScopeStack::pop_frame)?;
    Ok(match frame {
        Some(frame) => rescue_from(frame, ptr),
        None => {
            tracing::warn!("rescue on an empty scope stack");
            None
        }
    })
}

/// Runs `operation` inside its own frame, popped even if it panics.
pub fn scoped_call<R>(operation: impl FnOnce() -> R) -> Result<R, LifecycleError> {
    let _guard = enter()?;
    Ok(operation())
}

/// Opens a frame that is popped when the guard drops.
pub fn enter() -> Result<ScopeGuard, LifecycleError> {
    let frame = push()?;
    Ok(ScopeGuard {
        frame,
        _not_send: PhantomData,
    })
}

/// Number of frames open on the calling thread (zero if the stack is
/// unavailable).
#[must_use]
pub fn depth() -> usize {
    with_thread_stack(|stack| stack.depth()).unwrap_or(0)
}

/// Records held by the calling thread's stack.
#[must_use]
pub fn tracked() -> usize {
    with_thread_stack(|stack| stack.tracked()).unwrap_or(0)
}

/// Releases every frame on the calling thread. Later registrations start a
/// fresh base frame.
pub fn unwind_thread() -> usize {
    match with_thread_stack(|stack| stack.detach_from(FrameId::BASE)) {
        Ok(frames) => release_frames(frames),
        Err(_) => 0,
    }
}

/// Frame opened by [`enter`] on the calling thread.
///
/// Dropping the guard releases its frame and any frame left open above it.
#[derive(Debug)]
pub struct ScopeGuard {
    frame: FrameId,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    #[must_use]
    pub const fn frame(&self) -> FrameId {
        self.frame
    }

    /// Closes the frame, handing back the record for `ptr`.
    #[must_use]
    pub fn rescue<T>(self, ptr: *mut T) -> Option<AllocationRecord> {
        let this = ManuallyDrop::new(self);
        let frame = this.frame;
        let (above, own) = with_thread_stack(|stack| {
            if !stack.holds(frame) {
                return (Vec::new(), None);
            }
            let above = stack.detach_from(frame.next());
            let own = if stack.current_frame() == Some(frame) {
                stack.pop_frame()
            } else {
                None
            };
            (above, own)
        })
        .ok()?;
        release_frames(above);
        own.and_then(|own| rescue_from(own, ptr))
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let frame = self.frame;
        let detached = with_thread_stack(|stack| {
            // Frames pushed after ours was popped belong to someone else.
            if stack.holds(frame) {
                stack.detach_from(frame)
            } else {
                Vec::new()
            }
        });
        if let Ok(frames) = detached {
            release_frames(frames);
        }
    }
}
