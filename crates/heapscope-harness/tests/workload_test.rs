use heapscope_harness::{StressConfig, TagCycleConfig, run_stress, run_tag_cycle};

#[test]
fn stress_accounts_for_every_value_across_seeds() {
    for seed in [1_u64, 0xC0FFEE, u64::MAX] {
        for abandon in [false, true] {
            let report = run_stress(&StressConfig {
                threads: 3,
                cycles: 100,
                seed,
                rescue_percent: 100,
                abandon,
                ..StressConfig::default()
            })
            .expect("stress");
            assert!(
                report.ledger.is_exact(),
                "seed {seed:#x} abandon={abandon}: {:?}",
                report.ledger
            );
        }
    }
}

#[test]
fn stress_without_nesting() {
    let report = run_stress(&StressConfig {
        threads: 1,
        cycles: 200,
        max_depth: 0,
        ..StressConfig::default()
    })
    .expect("stress");
    report.verify().expect("exact");
    assert!(report.metrics.frames_pushed >= 200);
}

#[test]
fn tag_cycle_report_round_trips_through_json() {
    let report = run_tag_cycle(&TagCycleConfig {
        threads: 2,
        cycles: 10,
        per_cycle: 0,
        ..TagCycleConfig::default()
    })
    .expect("tag-cycle");
    report.verify().expect("exact");
    let value: serde_json::Value =
        serde_json::from_str(&report.to_json().expect("json")).expect("parse");
    assert_eq!(value["workload"], "tag-cycle");
    assert_eq!(value["ledger"]["issued"], 2);
    assert_eq!(value["leftover"], 0);
}
