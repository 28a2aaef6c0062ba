//! Allocation records: opaque identities paired with their destructors.
//!
//! A record owns the obligation to release one allocation. Dropping it runs
//! the destructor exactly once; `into_raw`/`into_parts` hand the obligation
//! back to the caller instead. Every tracking structure in this crate is
//! built from these records, which is how "released exactly once" holds
//! regardless of which path (pop, rescue, tag release, teardown) gets there.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::num::NonZeroUsize;

/// Opaque, non-null pointer value used as a lookup key.
///
/// The manager never dereferences an identity; it only hands it back to the
/// destructor registered alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(NonZeroUsize);

impl Identity {
    /// Captures the address of `ptr`. Returns `None` for null.
    #[must_use]
    pub fn from_ptr<T>(ptr: *mut T) -> Option<Self> {
        NonZeroUsize::new(ptr.expose_provenance()).map(Self)
    }

    /// Raw address value.
    #[must_use]
    pub const fn addr(self) -> usize {
        self.0.get()
    }

    /// Rebuilds the pointer this identity was captured from.
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        std::ptr::with_exposed_provenance_mut(self.0.get())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How a tracked allocation is released.
#[derive(Default)]
pub enum Destructor {
    /// Raw release through the C allocator (`free`).
    #[default]
    Free,
    /// Caller-supplied release function.
    Custom(unsafe fn(*mut c_void)),
    /// Caller-supplied closure, for destructors that carry state.
    Closure(Box<dyn FnOnce(*mut c_void) + Send>),
}

impl Destructor {
    /// Destructor for memory produced by `Box::<T>::into_raw`.
    #[must_use]
    pub fn drop_box<T>() -> Self {
        Self::Custom(drop_boxed::<T>)
    }

    pub fn closure(f: impl FnOnce(*mut c_void) + Send + 'static) -> Self {
        Self::Closure(Box::new(f))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Custom(_) => "custom",
            Self::Closure(_) => "closure",
        }
    }

    /// # Safety
    ///
    /// `ptr` must satisfy the contract this destructor was registered under,
    /// and must not have been released already.
    unsafe fn run(self, ptr: *mut c_void) {
        match self {
            // SAFETY: forwarded from the caller's contract.
            Self::Free => unsafe { crate::checked::release(ptr) },
            // SAFETY: forwarded from the caller's contract.
            Self::Custom(f) => unsafe { f(ptr) },
            Self::Closure(f) => f(ptr),
        }
    }
}

impl fmt::Debug for Destructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(func) => f.debug_tuple("Custom").field(func).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

unsafe fn drop_boxed<T>(ptr: *mut c_void) {
    // SAFETY: registered through `Destructor::drop_box::<T>`, whose users
    // promise `ptr` came from `Box::<T>::into_raw`.
    drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
}

/// One tracked allocation: its identity and the obligation to release it.
pub struct AllocationRecord {
    identity: Identity,
    destructor: Destructor,
}

impl AllocationRecord {
    /// Pairs an identity with its destructor.
    ///
    /// # Safety
    ///
    /// Calling `destructor` once on `identity` must be sound at any later
    /// point and from any thread, and nothing other than this record may
    /// release the allocation.
    #[must_use]
    pub unsafe fn new(identity: Identity, destructor: Destructor) -> Self {
        Self {
            identity,
            destructor,
        }
    }

    /// Takes ownership of a boxed value.
    #[must_use]
    pub fn from_box<T: Send + 'static>(value: Box<T>) -> Self {
        let ptr = Box::into_raw(value);
        match Identity::from_ptr(ptr) {
            // SAFETY: the pointer came straight from `Box::into_raw` and `T`
            // may be dropped on any thread.
            Some(identity) => unsafe { Self::new(identity, Destructor::drop_box::<T>()) },
            // Zero-sized boxes are dangling but never null.
            None => unreachable!("Box::into_raw returned null"),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub const fn destructor(&self) -> &Destructor {
        &self.destructor
    }

    /// Runs the destructor now.
    pub fn release(self) {
        drop(self);
    }

    /// Splits the record without running the destructor.
    #[must_use]
    pub fn into_parts(self) -> (Identity, Destructor) {
        let mut this = ManuallyDrop::new(self);
        (this.identity, std::mem::take(&mut this.destructor))
    }

    /// Gives the allocation back to the caller without running the destructor.
    #[must_use]
    pub fn into_raw(self) -> *mut c_void {
        self.into_parts().0.as_ptr()
    }
}

impl Drop for AllocationRecord {
    fn drop(&mut self) {
        let destructor = std::mem::take(&mut self.destructor);
        // SAFETY: `new` made the caller vouch for this pairing; taking the
        // destructor out guarantees it cannot run twice.
        unsafe { destructor.run(self.identity.as_ptr()) };
    }
}

impl fmt::Debug for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationRecord")
            .field("identity", &self.identity)
            .field("destructor", &self.destructor)
            .finish()
    }
}
