//! Parallel sampling controllers with Central-Limit-Theorem convergence.
//!
//! The controllers fan worker threads out over contiguous ranges of the
//! record sequence. Materializing workers keep running statistics of
//! `amount` and raise a shared stop flag once the estimated margin of
//! error `z * sigma / sqrt(n)` drops below the configured percentage of
//! the running mean; peers observe the flag at their next emission and
//! stop. Coordination is a single atomic flag with cooperative polling,
//! plus a bounded wait in the signal-based variant.

use crate::stats::{z_score, RunningStats};
use crate::stride::{partition_ranges, random_range_start};
use crate::{sample_target, sequential};
use parking_lot::Mutex;
use probedb_common::{ApproximationStatus, CltConfig, Record};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Fast workers may not stop before this many local samples.
const MIN_FAST_SAMPLES: u64 = 50;
/// Fast workers start checking convergence after this many local samples.
const MIN_CHECK_SAMPLES: u64 = 30;
/// Slow validators start cross-checking after this many local samples.
const MIN_SLOW_SAMPLES: u64 = 20;
/// Bounded wait on the fast worker in the signal-based variant.
const FAST_WAIT: Duration = Duration::from_millis(500);
/// Bounded wait on the slow worker in the signal-based variant.
const SLOW_WAIT: Duration = Duration::from_millis(100);
/// Grace period for a worker to flush after the stop flag is raised.
const STOP_GRACE: Duration = Duration::from_millis(100);

/// Shared running estimate published by fast workers and read by the slow
/// validators.
struct SharedEstimate {
    mean_bits: AtomicU64,
    count: AtomicUsize,
}

impl SharedEstimate {
    fn new() -> Self {
        Self {
            mean_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicUsize::new(0),
        }
    }

    fn publish(&self, stats: &RunningStats) {
        self.mean_bits
            .store(stats.mean().to_bits(), Ordering::Release);
        self.count.store(stats.count() as usize, Ordering::Release);
    }

    fn mean(&self) -> f64 {
        f64::from_bits(self.mean_bits.load(Ordering::Acquire))
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// CLT-validated sampling: half the pool runs coarse-stride fast workers
/// that stop the whole operation once their margin of error converges, the
/// other half runs fine-stride slow validators that may stop it once their
/// running mean agrees with the fast estimate and enough samples exist
/// globally. If early termination leaves fewer than a quarter of the
/// target, a final systematic pass tops the sample up.
pub fn clt_sample(records: &[Record], percent: f64, config: &CltConfig, seed: u64) -> Vec<Record> {
    let stop = AtomicBool::new(false);
    clt_sample_with_stop(records, percent, config, seed, &stop)
}

/// [`clt_sample`] with a caller-owned stop flag. Asserting the flag aborts
/// the run cooperatively: workers observe it at their next emission and
/// return whatever they have collected.
pub fn clt_sample_with_stop(
    records: &[Record],
    percent: f64,
    config: &CltConfig,
    seed: u64,
    stop: &AtomicBool,
) -> Vec<Record> {
    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return Vec::new();
    }
    if target == n {
        return records.to_vec();
    }

    let z = z_score(config.confidence_level);
    let check_interval = config.check_interval.max(1) as u64;
    let threads = config.num_threads.max(2);
    let fast_threads = (threads / 2).max(1);
    let slow_threads = (threads - fast_threads).max(1);

    let estimate = SharedEstimate::new();
    let merged = Mutex::new(Vec::with_capacity(target));

    thread::scope(|s| {
        // Fast workers: coarse strides, aggressive convergence checks.
        for (t, &(range_start, range_end)) in
            partition_ranges(n, fast_threads).iter().enumerate()
        {
            let estimate = &estimate;
            let merged = &merged;
            s.spawn(move || {
                let range_len = range_end - range_start;
                let share = (target / fast_threads).max(1);
                let stride = (range_len / share).max(3);
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let start = random_range_start(range_start, range_len, &mut rng);

                let mut local = Vec::with_capacity(share);
                let mut stats = RunningStats::new();
                let mut i = start;
                while i < range_end && local.len() < share && !stop.load(Ordering::Acquire) {
                    local.push(records[i]);
                    stats.push(records[i].amount);

                    if stats.count() % check_interval == 0 && stats.count() >= MIN_CHECK_SAMPLES {
                        estimate.publish(&stats);
                        if stats.count() >= MIN_FAST_SAMPLES
                            && stats.relative_error_percent(z) <= config.max_error_percent
                        {
                            debug!(
                                samples = stats.count(),
                                error = stats.relative_error_percent(z),
                                "fast worker converged"
                            );
                            stop.store(true, Ordering::Release);
                            break;
                        }
                    }
                    i += stride;
                }
                merged.lock().extend_from_slice(&local);
            });
        }

        // Slow validators: fine strides offset by half a step, checking at
        // double frequency against the published fast estimate.
        let slow_interval = (check_interval / 2).max(1);
        for (t, &(range_start, range_end)) in
            partition_ranges(n, slow_threads).iter().enumerate()
        {
            let estimate = &estimate;
            let merged = &merged;
            s.spawn(move || {
                let range_len = range_end - range_start;
                let share = (target / slow_threads).max(1);
                let stride = (range_len / share).max(1);
                let start = range_start + stride / 2;

                let mut local = Vec::with_capacity(share);
                let mut stats = RunningStats::new();
                let mut i = start;
                while i < range_end && local.len() < share && !stop.load(Ordering::Acquire) {
                    local.push(records[i]);
                    stats.push(records[i].amount);

                    if stats.count() % slow_interval == 0 && stats.count() >= MIN_SLOW_SAMPLES {
                        let global_mean = estimate.mean();
                        if global_mean != 0.0 {
                            let agreement =
                                ((stats.mean() - global_mean) / global_mean).abs();
                            if agreement <= config.max_error_percent / 100.0
                                && estimate.count() >= target / 2
                            {
                                debug!(
                                    samples = stats.count(),
                                    agreement, "slow validator confirmed estimate"
                                );
                                stop.store(true, Ordering::Release);
                                break;
                            }
                        }
                    }
                    i += stride;
                }
                merged.lock().extend_from_slice(&local);
            });
        }
    });

    let mut samples = merged.into_inner();

    // Early termination that starved the sample gets topped up with a
    // final systematic pass.
    if samples.len() < target / 4 {
        warn!(
            collected = samples.len(),
            target, "early stop undershot, topping up systematically"
        );
        let needed = (target / 4).max(1);
        let step = (n / needed).max(1);
        let mut i = 0;
        while i < n && samples.len() < target {
            samples.push(records[i]);
            i += step;
        }
    }

    samples.truncate(target);
    samples
}

/// Low-overhead CLT sampling: one stride pass per worker with occasional
/// convergence checks that let a worker return early. Small inputs skip
/// the thread pool entirely.
pub fn optimized_clt_sample(
    records: &[Record],
    percent: f64,
    config: &CltConfig,
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

    // Cap the pool so every worker has a meaningful share.
    let threads = config.num_threads.max(1).min((target / 100).max(1));

    if n < 5_000 || target < 200 || threads == 1 {
        let stride = (n / target).max(1);
        let mut samples = Vec::with_capacity(target);
        let mut i = 0;
        while i < n && samples.len() < target {
            samples.push(records[i]);
            i += stride;
        }
        return samples;
    }

    let z = z_score(config.confidence_level);
    let check_interval = config.check_interval.max(1) as u64;
    let per_thread = target / threads;
    let merged = Mutex::new(Vec::with_capacity(target));

    thread::scope(|s| {
        for (t, &(range_start, range_end)) in
            partition_ranges(n, threads).iter().enumerate()
        {
            let merged = &merged;
            s.spawn(move || {
                let range_len = range_end - range_start;
                let local_target = if t == threads - 1 {
                    target - (threads - 1) * per_thread
                } else {
                    per_thread
                };
                if local_target == 0 {
                    return;
                }
                let stride = (range_len / local_target).max(1);
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let start = random_range_start(range_start, range_len, &mut rng);

                let mut local = Vec::with_capacity(local_target);
                let mut stats = RunningStats::new();
                let mut i = start;
                while i < range_end && local.len() < local_target {
                    local.push(records[i]);
                    stats.push(records[i].amount);

                    if stats.count() % check_interval == 0
                        && stats.count() >= MIN_FAST_SAMPLES
                        && stats.relative_error_percent(z) <= config.max_error_percent
                    {
                        break;
                    }
                    i += stride;
                }
                merged.lock().extend_from_slice(&local);
            });
        }
    });

    let mut samples = merged.into_inner();
    samples.truncate(target);
    samples
}

/// Signal-based CLT sampling: one fast worker and one stride-1 slow
/// validator coordinated by a single stop flag, with bounded waits on both.
/// Returns partial results on timeout together with a status: `Drifting`
/// when a timeout forced partial collection, `InsufficientData` when fewer
/// than the minimum samples came back, `Stable` otherwise. An empty merge
/// falls back to single-threaded systematic sampling.
pub fn signal_clt_sample(
    records: &[Record],
    percent: f64,
    check_interval: usize,
    seed: u64,
) -> (Vec<Record>, ApproximationStatus) {
    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return (Vec::new(), ApproximationStatus::InsufficientData);
    }
    if target == n {
        return (records.to_vec(), ApproximationStatus::Stable);
    }

    let check_interval = check_interval.max(1);
    let stop = AtomicBool::new(false);
    let emitted = AtomicUsize::new(0);
    let mut timed_out = false;

    let (fast_samples, slow_samples) = thread::scope(|s| {
        let (fast_tx, fast_rx) = mpsc::channel::<Vec<Record>>();
        let (slow_tx, slow_rx) = mpsc::channel::<Vec<Record>>();

        {
            let stop = &stop;
            let emitted = &emitted;
            s.spawn(move || {
                // Fast scan at double the systematic step.
                let stride = (n / (target * 2)).max(2);
                let mut local = Vec::with_capacity(target / 2 + 1);
                let mut i = 0;
                while i < n && local.len() < target && !stop.load(Ordering::Acquire) {
                    local.push(records[i]);
                    emitted.fetch_add(1, Ordering::Relaxed);
                    if local.len() % check_interval == 0
                        && emitted.load(Ordering::Relaxed) >= target / 2
                    {
                        stop.store(true, Ordering::Release);
                        break;
                    }
                    i += stride;
                }
                let _ = fast_tx.send(local);
            });
        }

        {
            let stop = &stop;
            s.spawn(move || {
                // Stride-1 validation walk over a bounded share.
                let cap = (target / 4).max(1);
                let mut local = Vec::with_capacity(cap);
                let mut i = 0;
                while i < n && local.len() < cap && !stop.load(Ordering::Acquire) {
                    local.push(records[i]);
                    i += 1;
                }
                let _ = slow_tx.send(local);
            });
        }

        let fast = match fast_rx.recv_timeout(FAST_WAIT) {
            Ok(samples) => samples,
            Err(_) => {
                timed_out = true;
                stop.store(true, Ordering::Release);
                fast_rx.recv_timeout(STOP_GRACE).unwrap_or_default()
            }
        };
        let slow = match slow_rx.recv_timeout(SLOW_WAIT) {
            Ok(samples) => samples,
            Err(_) => {
                timed_out = true;
                stop.store(true, Ordering::Release);
                slow_rx.recv_timeout(STOP_GRACE).unwrap_or_default()
            }
        };
        (fast, slow)
    });

    let mut samples = Vec::with_capacity(fast_samples.len() + slow_samples.len());
    samples.extend_from_slice(&fast_samples);
    samples.extend_from_slice(&slow_samples);

    if samples.is_empty() {
        // Coordination produced nothing; fall back to a plain systematic
        // pass so the caller still gets an answer.
        warn!("signal-based coordination returned nothing, falling back to systematic");
        let mut rng = StdRng::seed_from_u64(seed);
        let fallback = sequential::systematic_sample(records, percent, &mut rng);
        let status = if fallback.is_empty() {
            ApproximationStatus::InsufficientData
        } else {
            ApproximationStatus::Stable
        };
        return (fallback, status);
    }

    samples.truncate(target);

    let minimum = MIN_CHECK_SAMPLES.min(target as u64) as usize;
    let status = if samples.len() < minimum {
        ApproximationStatus::InsufficientData
    } else if timed_out {
        ApproximationStatus::Drifting
    } else {
        ApproximationStatus::Stable
    };
    (samples, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn uniform_records(n: i64, seed: u64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|id| Record::new(id, rng.gen_range(0.0..1000.0), 0, 0, id))
            .collect()
    }

    #[test]
    fn test_clt_sample_respects_target_bound() {
        let data = uniform_records(50_000, 1);
        let config = CltConfig::default();
        let samples = clt_sample(&data, 10.0, &config, 42);
        let target = sample_target(data.len(), 10.0);
        assert!(samples.len() <= target);
        // Early stop can shrink the sample but never below the top-up floor.
        assert!(samples.len() >= target / 4, "got {}", samples.len());
    }

    #[test]
    fn test_clt_sample_estimate_is_usable() {
        let data = uniform_records(100_000, 2);
        let exact_mean: f64 =
            data.iter().map(|r| r.amount).sum::<f64>() / data.len() as f64;
        let samples = clt_sample(&data, 10.0, &CltConfig::default(), 7);
        let sample_mean: f64 =
            samples.iter().map(|r| r.amount).sum::<f64>() / samples.len() as f64;
        let relative = (sample_mean - exact_mean).abs() / exact_mean;
        assert!(relative < 0.05, "relative error {}", relative);
    }

    #[test]
    fn test_clt_sample_edges() {
        let config = CltConfig::default();
        assert!(clt_sample(&[], 10.0, &config, 1).is_empty());
        let data = uniform_records(100, 3);
        assert!(clt_sample(&data, 0.0, &config, 1).is_empty());
        assert_eq!(clt_sample(&data, 100.0, &config, 1).len(), 100);
    }

    #[test]
    fn test_clt_sample_constant_amounts_converges_fast() {
        // Zero variance converges at the first eligible check.
        let data: Vec<Record> = (0..50_000)
            .map(|id| Record::new(id, 42.0, 0, 0, id))
            .collect();
        let samples = clt_sample(&data, 20.0, &CltConfig::default(), 5);
        let target = sample_target(data.len(), 20.0);
        assert!(samples.len() >= target / 4);
        assert!(samples.len() <= target);
    }

    #[test]
    fn test_optimized_clt_small_input_single_threaded() {
        let data = uniform_records(1_000, 4);
        let samples = optimized_clt_sample(&data, 10.0, &CltConfig::optimized(), 1);
        assert_eq!(samples.len(), 100);
        // Stride path: first pick is index 0.
        assert_eq!(samples[0].id, 0);
    }

    #[test]
    fn test_optimized_clt_large_input_parallel() {
        let data = uniform_records(100_000, 5);
        let samples = optimized_clt_sample(&data, 10.0, &CltConfig::optimized(), 9);
        let target = sample_target(data.len(), 10.0);
        assert!(samples.len() <= target);
        assert!(!samples.is_empty());
    }

    #[test]
    fn test_signal_clt_returns_status() {
        let data = uniform_records(50_000, 6);
        let (samples, status) = signal_clt_sample(&data, 10.0, 10, 11);
        assert!(!samples.is_empty());
        assert!(samples.len() <= sample_target(data.len(), 10.0));
        assert!(matches!(
            status,
            ApproximationStatus::Stable | ApproximationStatus::Drifting
        ));
    }

    #[test]
    fn test_signal_clt_empty_input() {
        let (samples, status) = signal_clt_sample(&[], 10.0, 10, 1);
        assert!(samples.is_empty());
        assert_eq!(status, ApproximationStatus::InsufficientData);
    }

    #[test]
    fn test_signal_clt_full_percent() {
        let data = uniform_records(500, 7);
        let (samples, status) = signal_clt_sample(&data, 100.0, 10, 1);
        assert_eq!(samples.len(), 500);
        assert_eq!(status, ApproximationStatus::Stable);
    }
}
