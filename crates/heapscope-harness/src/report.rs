//! Workload reports.

use heapscope::{MetricsSnapshot, ReleaseOrder};
use serde::Serialize;

use crate::error::HarnessError;
use crate::ledger::LedgerSummary;

/// Outcome of one workload run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    /// Workload name (`stress` or `tag-cycle`).
    pub workload: &'static str,
    pub threads: usize,
    pub cycles: usize,
    pub seed: u64,
    pub release_order: ReleaseOrder,
    /// Destruction accounting for every tracked value the run issued.
    pub ledger: LedgerSummary,
    /// Records still tracked after the workers finished and were released
    /// by final teardown.
    pub leftover: usize,
    /// Metric deltas over the run. Other activity in the process also
    /// shows up here.
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
}

impl WorkloadReport {
    /// Fails unless every issued value was destructed exactly once.
    pub fn verify(&self) -> Result<(), HarnessError> {
        if self.ledger.double_released > 0 {
            return Err(HarnessError::DoubleReleased {
                count: self.ledger.double_released,
            });
        }
        if self.ledger.unreleased > 0 {
            return Err(HarnessError::Leaked {
                count: self.ledger.unreleased,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(ledger: LedgerSummary) -> WorkloadReport {
        WorkloadReport {
            workload: "stress",
            threads: 1,
            cycles: 1,
            seed: 7,
            release_order: ReleaseOrder::Lifo,
            ledger,
            leftover: 0,
            metrics: MetricsSnapshot::default(),
            elapsed_ms: 0,
        }
    }

    #[test]
    fn verify_flags_leaks_and_double_releases() {
        let exact = report(LedgerSummary {
            issued: 3,
            released: 3,
            ..LedgerSummary::default()
        });
        assert!(exact.verify().is_ok());

        let leaked = report(LedgerSummary {
            issued: 3,
            released: 2,
            unreleased: 1,
            double_released: 0,
        });
        assert!(matches!(leaked.verify(), Err(HarnessError::Leaked { count: 1 })));

        let doubled = report(LedgerSummary {
            issued: 3,
            released: 2,
            unreleased: 0,
            double_released: 1,
        });
        assert!(matches!(
            doubled.verify(),
            Err(HarnessError::DoubleReleased { count: 1 })
        ));
    }

    #[test]
    fn json_uses_lowercase_order() {
        let json = report(LedgerSummary::default()).to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["release_order"], "lifo");
        assert_eq!(value["workload"], "stress");
        assert_eq!(value["ledger"]["issued"], 0);
    }
}
