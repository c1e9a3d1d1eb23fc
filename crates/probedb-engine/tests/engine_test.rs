//! End-to-end scenarios through the scheduler façade: exact aggregates,
//! approximate aggregates with status envelopes, confidence intervals,
//! GROUP BY fan-out, and snapshot round-trips.

use probedb_common::{AggregateKind, ApproximationStatus, Record};
use probedb_engine::{planner, parse_query, Scheduler};
use probedb_store::RecordStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

/// Deterministic cyclic amounts with closed-form aggregates.
fn cyclic_records(n: i64) -> Vec<Record> {
    (0..n)
        .map(|id| Record::new(id, (id % 100 + 1) as f64, (id % 4) as i32, (id % 10) as i32, id))
        .collect()
}

/// Independent uniform amounts in [1, 100]; immune to stride alignment.
fn uniform_records(n: i64, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|id| Record::new(id, rng.gen_range(1.0..=100.0), (id % 4) as i32, 0, id))
        .collect()
}

fn scheduler_with(records: Vec<Record>) -> Scheduler {
    let scheduler = Scheduler::new();
    scheduler.insert_batch(records).unwrap();
    scheduler
}

#[test]
fn exact_sum_avg_count_closed_form() {
    let scheduler = scheduler_with(cyclic_records(200_000));

    let sum = scheduler.execute_exact_sum();
    assert_eq!(sum.status, ApproximationStatus::Stable);
    assert!((sum.value - 10_100_000.0).abs() < 1e-6);

    let avg = scheduler.execute_exact_avg();
    assert!((avg.value - 50.5).abs() < 1e-9);

    let count = scheduler.execute_exact_count();
    assert_eq!(count.value, 200_000.0);
}

#[test]
fn approximate_sum_within_two_percent() {
    let records = uniform_records(100_000, 11);
    let exact: f64 = records.iter().map(|r| r.amount).sum();
    let scheduler = scheduler_with(records);

    let result = scheduler.execute_sum_query("SELECT SUM(amount) FROM t", 10.0, 4);
    assert_eq!(result.status, ApproximationStatus::Stable);

    let relative = (result.value - exact).abs() / exact;
    assert!(relative < 0.02, "relative error {}", relative);

    // Roughly ten percent of the population was consumed.
    assert!(result.samples_used >= 9_000, "used {}", result.samples_used);
    assert!(result.samples_used <= 10_000, "used {}", result.samples_used);
    assert_eq!(result.confidence_level, 0.95);
}

#[test]
fn approximate_avg_small_rate_with_ci() {
    let records = uniform_records(200_000, 12);
    let exact_mean: f64 =
        records.iter().map(|r| r.amount).sum::<f64>() / records.len() as f64;
    let scheduler = scheduler_with(records);

    let (value, ci) = scheduler
        .execute_query_with_ci("SELECT AVG(amount) FROM t", 1.0, 4)
        .unwrap();

    assert!((value - exact_mean).abs() < 2.0, "estimate {} vs {}", value, exact_mean);
    let half_width = (ci.upper - ci.lower) / 2.0;
    assert!(half_width < 1.5, "half width {}", half_width);
    assert!(ci.lower <= value && value <= ci.upper);
}

#[test]
fn count_with_predicate_exact_and_approximate() {
    let records = uniform_records(100_000, 13);
    let exact_matching = records.iter().filter(|r| r.amount > 50.0).count() as f64;
    let scheduler = scheduler_with(records);

    let exact = scheduler
        .execute_query("SELECT COUNT(amount) FROM t WHERE amount > 50", 0.0, 4)
        .unwrap();
    assert_eq!(exact, exact_matching);

    let approx = scheduler
        .execute_query("SELECT COUNT(amount) FROM t WHERE amount > 50", 5.0, 4)
        .unwrap();
    let relative = (approx - exact_matching).abs() / exact_matching;
    assert!(relative < 0.05, "relative error {}", relative);
}

#[test]
fn group_by_region_estimates_each_group() {
    let records = uniform_records(100_000, 14);
    let scheduler = scheduler_with(records.clone());

    let groups = scheduler
        .execute_query_groupby("SELECT SUM(amount) FROM t GROUP BY region", 10.0, 4)
        .unwrap();
    assert_eq!(groups.len(), 4);

    for region in 0..4i32 {
        let exact: f64 = records
            .iter()
            .filter(|r| r.region == region)
            .map(|r| r.amount)
            .sum();
        let value = groups[&region.to_string()];
        let relative = (value - exact).abs() / exact;
        assert!(relative < 0.04, "region {}: error {}", region, relative);
    }
}

#[test]
fn group_by_exact_count_is_complete() {
    let scheduler = scheduler_with(cyclic_records(40_000));
    let groups = scheduler
        .execute_query_groupby("SELECT COUNT(amount) FROM t GROUP BY region", 0.0, 4)
        .unwrap();
    assert_eq!(groups.len(), 4);
    for region in 0..4 {
        assert_eq!(groups[&region.to_string()], 10_000.0);
    }
}

#[test]
fn snapshot_cycle_through_facade() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("e2e.snapshot");

    let scheduler = Scheduler::new();
    scheduler.create_database(&path).unwrap();
    scheduler.insert_batch(cyclic_records(1_000)).unwrap();
    scheduler.close_database().unwrap();

    let fresh = Scheduler::new();
    fresh.open_database(&path).unwrap();
    assert_eq!(fresh.get_total_records(), 1_000);
    assert!(fresh.get_tree_height() >= 1);

    // The restored sequence is sorted and complete.
    let restored = fresh.sample_records(&probedb_sample::Strategy::Stride { stride_bytes: None }, 100.0).unwrap();
    assert_eq!(restored.len(), 1_000);
    for (i, r) in restored.iter().enumerate() {
        assert_eq!(r.id, i as i64);
    }
}

/// The AVG confidence interval covers the exact mean in the vast majority
/// of seeded runs (nominal 95%, asserted at 88% for finite-population
/// slack).
#[test]
fn avg_ci_coverage_over_seeds() {
    let records = uniform_records(100_000, 15);
    let exact_mean: f64 =
        records.iter().map(|r| r.amount).sum::<f64>() / records.len() as f64;

    let mut store = RecordStore::in_memory();
    store.insert_batch(records).unwrap();

    let query = parse_query("SELECT AVG(amount) FROM t", 2.0).unwrap();
    let runs = 100u64;
    let mut covered = 0u32;
    for seed in 0..runs {
        let (_, ci) = planner::run_aggregate_with_ci(&store, &query, 4, seed).unwrap();
        if ci.lower <= exact_mean && exact_mean <= ci.upper {
            covered += 1;
        }
    }
    assert!(covered >= 88, "covered only {}/{}", covered, runs);
}

#[test]
fn benchmark_all_aggregate_kinds() {
    let scheduler = scheduler_with(uniform_records(100_000, 16));

    for kind in [AggregateKind::Sum, AggregateKind::Avg, AggregateKind::Count] {
        let results = scheduler.benchmark_query(kind, 10.0, 4);
        assert!(
            results.error_percentage < 5.0,
            "{}: error {}%",
            kind,
            results.error_percentage
        );
        assert!(results.exact_time_ms >= 0.0);
        assert!(results.approximate_time_ms >= 0.0);
        assert_eq!(results.threads_used, 4);
    }
}

#[test]
fn malformed_and_out_of_range_queries_are_contained() {
    let scheduler = scheduler_with(cyclic_records(1_000));

    // Unsupported aggregate surfaces as an error status, never a panic.
    let result = scheduler.execute_sum_query("SELECT MEDIAN(amount) FROM t", 10.0, 4);
    assert_eq!(result.status, ApproximationStatus::Error);

    // Out-of-range sampling percentages are rejected at the boundary.
    assert!(scheduler
        .execute_query("SELECT SUM(amount) FROM t", 150.0, 4)
        .is_err());
    assert!(scheduler
        .execute_query("SELECT SUM(amount) FROM t", -3.0, 4)
        .is_err());
}
