//! Sequential selection strategies over the record sequence.

use crate::sample_target;
use probedb_common::Record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Systematic sampling: every step-th record starting from a random offset
/// inside the first interval, which keeps the first moment unbiased.
pub fn systematic_sample(records: &[Record], percent: f64, rng: &mut impl Rng) -> Vec<Record> {
    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Vec::new();
    }
    if target == records.len() {
        return records.to_vec();
    }

    let step = (records.len() / target).max(1);
    let start = rng.gen_range(0..step);

    let mut samples = Vec::with_capacity(target);
    let mut i = start;
    while i < records.len() && samples.len() < target {
        samples.push(records[i]);
        i += step;
    }
    samples
}

/// Coarse scan: the systematic step multiplied by `step_factor` (clamped to
/// at least 2), trading sample count for fewer touched cache lines.
pub fn fast_sample(records: &[Record], percent: f64, step_factor: usize) -> Vec<Record> {
    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Vec::new();
    }
    if target == records.len() {
        return records.to_vec();
    }

    let step = (records.len() / target).max(1) * step_factor.max(2);

    let mut samples = Vec::with_capacity(target);
    let mut i = 0;
    while i < records.len() && samples.len() < target {
        samples.push(records[i]);
        i += step;
    }
    samples
}

/// Dual-rate scan: one third of the target from a coarse stride, the rest
/// from a fine stride offset by half the coarse step so the two grids do
/// not collide.
pub fn dual_sample(records: &[Record], percent: f64) -> Vec<Record> {
    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return Vec::new();
    }
    if target == n {
        return records.to_vec();
    }

    let fast_target = target / 3;
    let slow_target = target - fast_target;

    let mut samples = Vec::with_capacity(target);
    let mut offset = 0;

    if fast_target > 0 {
        let fast_step = (n / fast_target).max(1) * 3;
        let mut i = 0;
        while i < n && samples.len() < fast_target {
            samples.push(records[i]);
            i += fast_step;
        }
        offset = fast_step / 2;
    }

    let slow_step = (n / slow_target.max(1)).max(1);
    let mut i = offset;
    while i < n && samples.len() < target {
        samples.push(records[i]);
        i += slow_step;
    }
    samples
}

/// Uniform random sampling without replacement: `target` distinct positions
/// drawn from a seeded generator, emitted in increasing index order.
/// Identical input and seed always produce the identical sample.
pub fn random_sample(records: &[Record], percent: f64, seed: u64) -> Vec<Record> {
    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Vec::new();
    }
    if target == records.len() {
        return records.to_vec();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = BTreeSet::new();
    while positions.len() < target {
        positions.insert(rng.gen_range(0..records.len()));
    }

    positions.into_iter().map(|i| records[i]).collect()
}

/// Round-robin partitioning of a sample for downstream parallel reduction.
/// Partition `i % num_threads` receives record `i`.
pub fn partition_round_robin(records: &[Record], num_threads: usize) -> Vec<Vec<Record>> {
    let threads = num_threads.max(1);
    let mut partitions = vec![Vec::with_capacity(records.len() / threads + 1); threads];
    for (i, record) in records.iter().enumerate() {
        partitions[i % threads].push(*record);
    }
    partitions
}
