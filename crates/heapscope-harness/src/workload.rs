//! Multi-threaded workloads.
//!
//! `stress` drives the per-thread scope stacks with random nesting,
//! rescues and frames abandoned at thread exit. `tag-cycle` drives a shared
//! registry through repeated work cycles with early single releases. Both
//! issue [`Tracked`](crate::ledger::Tracked) values so every destruction is
//! counted.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use heapscope::{
    AllocRegistry, ReleaseOutcome, Tag, TagLifecycle, config, global_metrics, scope,
};

use crate::error::HarnessError;
use crate::ledger::DropLedger;
use crate::report::WorkloadReport;

/// Deterministic xorshift64 generator.
#[derive(Debug, Clone)]
pub struct XorShift64(u64);

impl XorShift64 {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    /// Independent stream for worker `index`.
    #[must_use]
    pub const fn for_worker(seed: u64, index: usize) -> Self {
        Self::new(seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..bound`; zero when `bound` is zero.
    pub fn below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u64() % bound as u64) as usize
    }

    pub fn percent(&mut self, chance: u8) -> bool {
        self.below(100) < usize::from(chance)
    }
}

/// Scope-mode stress parameters.
#[derive(Debug, Clone)]
pub struct StressConfig {
    pub threads: usize,
    pub cycles: usize,
    pub seed: u64,
    /// Deepest nesting below each cycle's own frame.
    pub max_depth: usize,
    /// Most values registered per frame visit.
    pub max_records: usize,
    /// Chance (0-100) that a nested frame rescues its result.
    pub rescue_percent: u8,
    /// Leave frames open when each worker exits.
    pub abandon: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            cycles: 1_000,
            seed: 0xDEAD_BEEF,
            max_depth: 6,
            max_records: 4,
            rescue_percent: 30,
            abandon: true,
        }
    }
}

/// Tag-mode parameters.
#[derive(Debug, Clone)]
pub struct TagCycleConfig {
    pub threads: usize,
    pub cycles: usize,
    pub seed: u64,
    /// Values tagged per cycle.
    pub per_cycle: usize,
}

impl Default for TagCycleConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            cycles: 1_000,
            seed: 0xDEAD_BEEF,
            per_cycle: 8,
        }
    }
}

/// Runs the scope-mode stress workload.
pub fn run_stress(cfg: &StressConfig) -> Result<WorkloadReport, HarnessError> {
    let ledger = DropLedger::new();
    let before = global_metrics().snapshot();
    let started = Instant::now();

    let workers: Vec<_> = (0..cfg.threads)
        .map(|index| {
            let cfg = cfg.clone();
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || stress_worker(&cfg, index, &ledger))
        })
        .collect();
    join_all(workers)?;

    let report = WorkloadReport {
        workload: "stress",
        threads: cfg.threads,
        cycles: cfg.cycles,
        seed: cfg.seed,
        release_order: config().release_order,
        ledger: ledger.summary(),
        leftover: 0,
        metrics: global_metrics().snapshot().since(&before),
        elapsed_ms: elapsed_ms(started),
    };
    tracing::info!(
        issued = report.ledger.issued,
        released = report.ledger.released,
        elapsed_ms = report.elapsed_ms,
        "stress finished"
    );
    Ok(report)
}

fn stress_worker(
    cfg: &StressConfig,
    index: usize,
    ledger: &Arc<DropLedger>,
) -> Result<(), HarnessError> {
    let mut rng = XorShift64::for_worker(cfg.seed, index);
    for _ in 0..cfg.cycles {
        scope::scoped_call(|| visit_frame(&mut rng, cfg, ledger, 0))??;
    }
    if cfg.abandon {
        for _ in 0..=rng.below(3) {
            scope::push()?;
            scope::adopt(Box::new(ledger.issue()))?;
        }
        tracing::debug!(worker = index, depth = scope::depth(), "leaving frames open");
    }
    Ok(())
}

fn visit_frame(
    rng: &mut XorShift64,
    cfg: &StressConfig,
    ledger: &Arc<DropLedger>,
    depth: usize,
) -> Result<(), HarnessError> {
    for _ in 0..rng.below(cfg.max_records + 1) {
        scope::adopt(Box::new(ledger.issue()))?;
    }
    if rng.below(4) == 0 {
        scope::allocate_in_scope(64 + rng.below(512))?;
    }
    if depth >= cfg.max_depth || rng.below(2) == 0 {
        return Ok(());
    }

    let guard = scope::enter()?;
    let result = scope::adopt(Box::new(ledger.issue()))?;
    visit_frame(rng, cfg, ledger, depth + 1)?;
    if rng.percent(cfg.rescue_percent) {
        if let Some(record) = guard.rescue(result) {
            scope::register_record(record)?;
        }
    }
    Ok(())
}

/// Runs the tag-mode workload against a fresh registry.
pub fn run_tag_cycle(cfg: &TagCycleConfig) -> Result<WorkloadReport, HarnessError> {
    let ledger = DropLedger::new();
    let registry = Arc::new(AllocRegistry::try_with_config(config())?);
    let before = global_metrics().snapshot();
    let started = Instant::now();

    let workers: Vec<_> = (0..cfg.threads)
        .map(|index| {
            let cfg = cfg.clone();
            let ledger = Arc::clone(&ledger);
            let registry = Arc::clone(&registry);
            thread::spawn(move || tag_worker(&registry, &cfg, index, &ledger))
        })
        .collect();
    join_all(workers)?;
    let leftover = registry.release_all();

    let report = WorkloadReport {
        workload: "tag-cycle",
        threads: cfg.threads,
        cycles: cfg.cycles,
        seed: cfg.seed,
        release_order: registry.release_order(),
        ledger: ledger.summary(),
        leftover,
        metrics: global_metrics().snapshot().since(&before),
        elapsed_ms: elapsed_ms(started),
    };
    tracing::info!(
        issued = report.ledger.issued,
        leftover,
        elapsed_ms = report.elapsed_ms,
        "tag-cycle finished"
    );
    Ok(report)
}

fn tag_worker(
    registry: &AllocRegistry,
    cfg: &TagCycleConfig,
    index: usize,
    ledger: &Arc<DropLedger>,
) -> Result<(), HarnessError> {
    let mut rng = XorShift64::for_worker(cfg.seed, index);
    let app = registry.tagged(Tag::APPLICATION);
    let cycle = registry.tagged(Tag::WORK_CYCLE);
    app.adopt(Box::new(ledger.issue()))?;

    for _ in 0..cfg.cycles {
        cycle.run_cycle(|c| -> Result<(), HarnessError> {
            let mut live = Vec::with_capacity(cfg.per_cycle);
            for _ in 0..cfg.per_cycle {
                live.push(c.adopt(Box::new(ledger.issue()))?);
            }
            let _ = c.allocate(32 + rng.below(256));
            if !live.is_empty() {
                let victim = live.swap_remove(rng.below(live.len()));
                release_twice(c, victim)?;
            }
            Ok(())
        })?;
    }

    let released = app.release();
    tracing::debug!(worker = index, released, "application state released");
    Ok(())
}

/// Releases `ptr` twice; only the first call may destruct.
fn release_twice<T>(cycle: &TagLifecycle<'_>, ptr: *mut T) -> Result<(), HarnessError> {
    let first = cycle.release_one(ptr);
    let second = cycle.release_one(ptr);
    if first == ReleaseOutcome::Released && second == ReleaseOutcome::NotTracked {
        Ok(())
    } else {
        tracing::error!(?first, ?second, "single release was not idempotent");
        Err(HarnessError::NotIdempotent { first, second })
    }
}

fn join_all(
    workers: Vec<thread::JoinHandle<Result<(), HarnessError>>>,
) -> Result<(), HarnessError> {
    for (index, worker) in workers.into_iter().enumerate() {
        worker
            .join()
            .map_err(|_| HarnessError::WorkerPanicked { index })??;
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut zero = XorShift64::new(0);
        assert_ne!(zero.next_u64(), 0);
        assert_eq!(zero.below(0), 0);
    }

    #[test]
    fn worker_streams_differ() {
        let mut a = XorShift64::for_worker(7, 0);
        let mut b = XorShift64::for_worker(7, 1);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn double_release_must_be_idempotent() {
        let registry = AllocRegistry::new();
        let cycle = registry.tagged(Tag::WORK_CYCLE);
        let ledger = DropLedger::new();
        let tracked = cycle.adopt(Box::new(ledger.issue())).expect("untracked");
        release_twice(&cycle, tracked).expect("released once");
        assert_eq!(ledger.count(0), 1);

        let err = release_twice(&cycle, tracked).expect_err("nothing left to release");
        assert!(matches!(
            err,
            HarnessError::NotIdempotent {
                first: ReleaseOutcome::NotTracked,
                second: ReleaseOutcome::NotTracked,
            }
        ));
        assert_eq!(ledger.count(0), 1);
    }

    #[test]
    fn small_stress_is_exact() {
        let report = run_stress(&StressConfig {
            threads: 2,
            cycles: 50,
            ..StressConfig::default()
        })
        .expect("stress");
        assert!(report.ledger.issued > 0);
        report.verify().expect("every value destructed once");
    }

    #[test]
    fn small_tag_cycle_is_exact() {
        let report = run_tag_cycle(&TagCycleConfig {
            threads: 2,
            cycles: 20,
            per_cycle: 3,
            ..TagCycleConfig::default()
        })
        .expect("tag-cycle");
        assert_eq!(report.leftover, 0);
        assert_eq!(report.ledger.issued, 2 + 2 * 20 * 3);
        report.verify().expect("every value destructed once");
    }
}
