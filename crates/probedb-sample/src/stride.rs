//! Fixed-interval (stride) scans over the cached record sequence, including
//! the partitioned multithreaded variants used as the planner's default
//! approximate path.

use crate::sample_target;
use parking_lot::Mutex;
use probedb_common::Record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Converts an optional byte stride into a record stride; without one the
/// stride is derived from the target count. Always at least 1.
fn resolve_stride(len: usize, target: usize, stride_bytes: Option<usize>) -> usize {
    match stride_bytes {
        Some(bytes) => (bytes / Record::WIRE_SIZE).max(1),
        None => (len / target).max(1),
    }
}

/// Linear scan emitting every stride-th record from index 0.
pub fn stride_sample(records: &[Record], percent: f64, stride_bytes: Option<usize>) -> Vec<Record> {
    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Vec::new();
    }
    if target == records.len() {
        return records.to_vec();
    }

    let stride = resolve_stride(records.len(), target, stride_bytes);
    let mut samples = Vec::with_capacity(target);
    let mut i = 0;
    while i < records.len() && samples.len() < target {
        samples.push(records[i]);
        i += stride;
    }
    samples
}

/// Stride scan with a random start inside the first interval. Same variance
/// as [`stride_sample`] for the aggregate, but unbiased in the first moment.
pub fn random_start_stride_sample(
    records: &[Record],
    percent: f64,
    stride_bytes: Option<usize>,
    rng: &mut impl Rng,
) -> Vec<Record> {
    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Vec::new();
    }
    if target == records.len() {
        return records.to_vec();
    }

    let stride = resolve_stride(records.len(), target, stride_bytes);
    let start = rng.gen_range(0..stride);

    let mut samples = Vec::with_capacity(target);
    let mut i = start;
    while i < records.len() && samples.len() < target {
        samples.push(records[i]);
        i += stride;
    }
    samples
}

/// Splits `len` into `threads` contiguous ranges; the last range absorbs
/// the remainder.
pub(crate) fn partition_ranges(len: usize, threads: usize) -> Vec<(usize, usize)> {
    let threads = threads.max(1);
    let base = len / threads;
    (0..threads)
        .map(|t| {
            let start = t * base;
            let end = if t == threads - 1 { len } else { start + base };
            (start, end)
        })
        .filter(|(start, end)| start < end)
        .collect()
}

/// Random start position for a worker's range: uniform within a bounded
/// prefix (a tenth of the range, capped at 100 records) so the first moment
/// stays unbiased without risking pathological grid alignment.
pub(crate) fn random_range_start(range_start: usize, range_len: usize, rng: &mut impl Rng) -> usize {
    let prefix = (range_len / 10).min(100).max(1);
    range_start + rng.gen_range(0..prefix)
}

/// Partitioned stride sampling: the sequence splits into one contiguous
/// range per worker, and each worker owns `1/T` of the global target (its
/// range length times the sampling rate), collected via stride with a
/// random start. Workers buffer locally; the merge happens after completion
/// under one mutex. The merged sequence is not globally ordered by id.
pub fn partitioned_stride_sample(
    records: &[Record],
    percent: f64,
    num_threads: usize,
    seed: u64,
) -> Vec<Record> {
    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return Vec::new();
    }
    if target == n {
        return records.to_vec();
    }

    let ranges = partition_ranges(n, num_threads);
    let merged = Mutex::new(Vec::with_capacity(target + ranges.len()));

    thread::scope(|s| {
        for (t, &(range_start, range_end)) in ranges.iter().enumerate() {
            let merged = &merged;
            s.spawn(move || {
                let range_len = range_end - range_start;
                let local_target = (range_len as f64 * percent / 100.0) as usize;
                if local_target == 0 {
                    return;
                }

                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let stride = (range_len / local_target).max(1);
                let start = random_range_start(range_start, range_len, &mut rng);

                let mut local = Vec::with_capacity(local_target);
                let mut i = start;
                while i < range_end && local.len() < local_target {
                    local.push(records[i]);
                    i += stride;
                }

                merged.lock().extend_from_slice(&local);
            });
        }
    });

    merged.into_inner()
}

/// Direct-aggregation hot path: the same partitioned stride walk, but each
/// worker keeps a local sum and count and folds them into shared atomics on
/// completion. No sample vector is materialized. Returns the raw sampled
/// sum of `amount` and the number of records visited; scaling is the
/// caller's job.
///
/// The f64 sum merges through a compare-and-swap loop over its bit pattern,
/// so the result is exact up to the non-associativity of IEEE-754 addition.
pub fn partitioned_stride_sum(
    records: &[Record],
    percent: f64,
    num_threads: usize,
    seed: u64,
) -> (f64, u64) {
    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return (0.0, 0);
    }

    let full_scan = percent >= 100.0;
    let ranges = partition_ranges(n, num_threads);
    let sum_bits = AtomicU64::new(0f64.to_bits());
    let count = AtomicU64::new(0);

    thread::scope(|s| {
        for (t, &(range_start, range_end)) in ranges.iter().enumerate() {
            let sum_bits = &sum_bits;
            let count = &count;
            s.spawn(move || {
                let range_len = range_end - range_start;
                let local_target = if full_scan {
                    range_len
                } else {
                    (range_len as f64 * percent / 100.0) as usize
                };
                if local_target == 0 {
                    return;
                }

                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let stride = (range_len / local_target).max(1);
                let start = if full_scan {
                    range_start
                } else {
                    random_range_start(range_start, range_len, &mut rng)
                };

                let mut local_sum = 0.0f64;
                let mut local_count = 0u64;
                let mut i = start;
                while i < range_end && (local_count as usize) < local_target {
                    local_sum += records[i].amount;
                    local_count += 1;
                    i += stride;
                }

                // Fold into the shared accumulator; CAS tolerates the lack
                // of a native atomic f64 add.
                let mut current = sum_bits.load(Ordering::Relaxed);
                loop {
                    let next = f64::from_bits(current) + local_sum;
                    match sum_bits.compare_exchange_weak(
                        current,
                        next.to_bits(),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
                count.fetch_add(local_count, Ordering::SeqCst);
            });
        }
    });

    (
        f64::from_bits(sum_bits.load(Ordering::SeqCst)),
        count.load(Ordering::SeqCst),
    )
}
