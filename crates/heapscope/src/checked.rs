//! Checked allocation primitives.
//!
//! Physical allocation is delegated to the C allocator. The fatal entry
//! points never return null: exhaustion is logged and the process exits
//! with [`EXIT_OS_ERROR`], since a long-running daemon has no safe way to
//! continue without memory.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::LifecycleError;
use crate::metrics::{LifecycleMetrics, global_metrics};

/// Exit status used for fatal exhaustion (`EX_OSERR` from sysexits).
pub const EXIT_OS_ERROR: i32 = 71;

/// Allocates `size` bytes, reporting exhaustion as an error.
///
/// Zero-size requests are served as one byte so that null always means
/// the allocator is exhausted.
pub fn try_allocate(size: usize) -> Result<NonNull<c_void>, LifecycleError> {
    // SAFETY: malloc has no preconditions.
    let ptr = unsafe { libc::malloc(size.max(1)) };
    NonNull::new(ptr).ok_or(LifecycleError::AllocationFailed { size })
}

/// Allocates `size` bytes or terminates the process.
#[must_use]
pub fn allocate(size: usize) -> NonNull<c_void> {
    try_allocate(size).unwrap_or_else(|err| fatal(&err))
}

/// Resizes `ptr` to `size` bytes, reporting exhaustion as an error.
///
/// On failure the original allocation is untouched and still owned by the
/// caller.
///
/// # Safety
///
/// `ptr` must be null or a live pointer obtained from this module (or the C
/// allocator), and must not be tracked by a scope or registry while it is
/// being moved.
pub unsafe fn try_reallocate(
    ptr: *mut c_void,
    size: usize,
) -> Result<NonNull<c_void>, LifecycleError> {
    // SAFETY: forwarded from the caller's contract.
    let new_ptr = unsafe { libc::realloc(ptr, size.max(1)) };
    NonNull::new(new_ptr).ok_or(LifecycleError::ReallocationFailed {
        addr: ptr.addr(),
        size,
    })
}

/// Resizes `ptr` to `size` bytes or terminates the process.
///
/// The original allocation is released before exiting.
///
/// # Safety
///
/// Same contract as [`try_reallocate`].
#[must_use]
pub unsafe fn reallocate(ptr: *mut c_void, size: usize) -> NonNull<c_void> {
    // SAFETY: forwarded from the caller's contract.
    match unsafe { try_reallocate(ptr, size) } {
        Ok(new_ptr) => new_ptr,
        Err(err) => {
            // SAFETY: realloc left `ptr` intact on failure.
            unsafe { release(ptr) };
            fatal(&err)
        }
    }
}

/// Raw release, the default destructor.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from the C allocator that nothing
/// else will release.
pub unsafe fn release(ptr: *mut c_void) {
    // SAFETY: forwarded from the caller's contract.
    unsafe { libc::free(ptr) };
}

/// Logs `err` and terminates the process with [`EXIT_OS_ERROR`].
pub fn fatal(err: &LifecycleError) -> ! {
    LifecycleMetrics::inc(&global_metrics().fatal_exits);
    tracing::error!(error = %err, status = EXIT_OS_ERROR, "memory exhaustion, exiting");
    std::process::exit(EXIT_OS_ERROR)
}
