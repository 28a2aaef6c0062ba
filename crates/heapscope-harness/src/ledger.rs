//! Values that count their own destruction.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Per-value destruction counts, indexed by issue order.
#[derive(Debug, Default)]
pub struct DropLedger {
    counts: Mutex<Vec<u32>>,
}

impl DropLedger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fresh value whose drop is recorded here.
    #[must_use]
    pub fn issue(self: &Arc<Self>) -> Tracked {
        let serial = {
            let mut counts = self.counts.lock();
            counts.push(0);
            counts.len() - 1
        };
        Tracked {
            serial,
            ledger: Arc::clone(self),
        }
    }

    fn record_drop(&self, serial: usize) {
        if let Some(count) = self.counts.lock().get_mut(serial) {
            *count += 1;
        }
    }

    #[must_use]
    pub fn count(&self, serial: usize) -> u32 {
        self.counts.lock().get(serial).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        let counts = self.counts.lock();
        let mut summary = LedgerSummary {
            issued: counts.len(),
            ..LedgerSummary::default()
        };
        for &count in counts.iter() {
            match count {
                0 => summary.unreleased += 1,
                1 => summary.released += 1,
                _ => summary.double_released += 1,
            }
        }
        summary
    }
}

/// Destruction accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub issued: usize,
    pub released: usize,
    pub unreleased: usize,
    pub double_released: usize,
}

impl LedgerSummary {
    /// Every issued value was destructed exactly once.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        self.unreleased == 0 && self.double_released == 0
    }
}

/// A tracked value. Dropping it bumps its ledger slot.
#[derive(Debug)]
pub struct Tracked {
    serial: usize,
    ledger: Arc<DropLedger>,
}

impl Tracked {
    #[must_use]
    pub const fn serial(&self) -> usize {
        self.serial
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.ledger.record_drop(self.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_are_counted_per_value() {
        let ledger = DropLedger::new();
        let a = ledger.issue();
        let b = ledger.issue();
        assert_eq!((a.serial(), b.serial()), (0, 1));
        drop(a);
        let summary = ledger.summary();
        assert_eq!(summary.issued, 2);
        assert_eq!(summary.released, 1);
        assert_eq!(summary.unreleased, 1);
        assert!(!summary.is_exact());
        drop(b);
        assert!(ledger.summary().is_exact());
        assert_eq!(ledger.count(1), 1);
    }
}
