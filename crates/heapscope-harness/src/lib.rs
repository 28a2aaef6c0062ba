//! Stress and verification harness for heapscope.
//!
//! This crate provides:
//! - Drop ledger: values that count their own destruction
//! - Workloads: multi-threaded scope-mode and tag-mode traffic driven by a
//!   deterministic PRNG
//! - Reports: JSON summaries with destructor accounting and metric deltas

#![forbid(unsafe_code)]

pub mod error;
pub mod ledger;
pub mod report;
pub mod workload;

pub use error::HarnessError;
pub use ledger::{DropLedger, LedgerSummary, Tracked};
pub use report::WorkloadReport;
pub use workload::{StressConfig, TagCycleConfig, XorShift64, run_stress, run_tag_cycle};
