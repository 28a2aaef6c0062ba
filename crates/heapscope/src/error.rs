//! Error type shared by every heapscope component.

use thiserror::Error;

use crate::record::Identity;

/// Failures surfaced by the lifecycle manager.
///
/// Allocation and registry-reservation failures are normally fatal; the
/// `try_*` entry points return them so callers can decide how to die.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: usize },
    #[error("reallocation of {addr:#x} to {size} bytes failed")]
    ReallocationFailed { addr: usize, size: usize },
    #[error("registry could not reserve {capacity} slots")]
    RegistryReserve { capacity: usize },
    #[error("identity {0} is already tracked")]
    AlreadyTracked(Identity),
    #[error("scope stack unavailable: {0}")]
    StackUnavailable(&'static str),
}

impl LifecycleError {
    /// Returns true for failures that have no degraded path.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. }
                | Self::ReallocationFailed { .. }
                | Self::RegistryReserve { .. }
        )
    }
}
