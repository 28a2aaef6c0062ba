//! # heapscope
//!
//! Lifecycle bookkeeping for manually managed heap allocations.
//!
//! Every allocation that should outlive a single statement is registered
//! together with the routine that releases it. Two strategies decide when
//! that routine runs:
//!
//! - **Scope mode** ([`scope`]): a per-thread stack of frames. Popping a frame
//!   releases everything registered in it; a rescue keeps one result alive
//!   and hands it to the caller.
//! - **Tag mode** ([`tag`], [`registry`]): a thread-safe table keyed by
//!   address. Records carry a coarse [`Tag`] and the registering thread, and
//!   are released one at a time or in bulk per (tag, thread).
//!
//! Allocation itself goes through [`checked`], which turns exhaustion into
//! a logged fatal exit instead of a null pointer.
//!
//! ## Modules
//!
//! - [`record`]: identities, destructors and owning allocation records.
//! - [`checked`]: the checked allocator.
//! - [`registry`]: the tag registry.
//! - [`scope`]: frame stacks and the per-thread default stack.
//! - [`tag`]: tags and the per-tag view of a registry.
//! - [`global`]: the process-wide registry and teardown.
//! - [`config`]: environment-driven configuration.
//! - [`metrics`]: atomic counters.
//! - [`error`]: error types.

#![deny(unsafe_code)]

pub mod checked;
pub mod config;
pub mod error;
pub mod global;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod scope;
pub mod tag;

pub use config::{LifecycleConfig, ReleaseOrder, config};
pub use error::LifecycleError;
pub use global::{ShutdownReport, global, shutdown};
pub use metrics::{MetricsSnapshot, global_metrics};
pub use record::{AllocationRecord, Destructor, Identity};
pub use registry::{AllocRegistry, ReleaseOutcome};
pub use scope::{FrameId, FrameScope, ScopeGuard, ScopeStack};
pub use tag::{Tag, TagLifecycle};
