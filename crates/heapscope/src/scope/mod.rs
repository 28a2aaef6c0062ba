//! Scope mode: lifetimes that follow call nesting.
//!
//! A [`ScopeStack`] is a stack of frames. Registrations attach to the top
//! frame; popping a frame releases exactly what it holds, and a rescue pops
//! while keeping one record alive for the caller. Explicit stacks can be
//! owned and passed around; the free functions operate on a lazily created
//! per-thread stack that is unwound when the thread exits.

mod stack;
mod thread;

pub use stack::{Frame, FrameId, FrameScope, ScopeStack};
pub use thread::{
    ScopeGuard, adopt, allocate_in_scope, depth, enter, pop, pop_rescue, push, register_in_scope,
    register_record, scoped_call, tracked, unwind_thread,
};
