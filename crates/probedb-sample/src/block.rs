//! Block and page oriented selection: whole runs of contiguous records are
//! taken at a fixed block interval, which keeps the scan cache-friendly and
//! cheap per sampled record.

use crate::sample_target;
use parking_lot::Mutex;
use probedb_common::{ProbeError, Record, Result};
use std::thread;

/// Number of variance zones used by adaptive block sampling.
const ADAPTIVE_ZONES: usize = 10;

fn require_nonzero(value: usize, what: &str) -> Result<()> {
    if value == 0 {
        return Err(ProbeError::InvalidArgument(format!(
            "{} must be non-zero",
            what
        )));
    }
    Ok(())
}

/// Core block selection: pick every interval-th block of `block_size`
/// records and emit the whole block, capped at `target` records overall.
/// The block target is `ceil(total_blocks * percent / 100)`.
fn select_blocks(records: &[Record], percent: f64, target: usize, block_size: usize) -> Vec<Record> {
    let total_blocks = records.len().div_ceil(block_size);
    let block_target = ((total_blocks as f64 * percent / 100.0).ceil() as usize).max(1);
    let interval = (total_blocks / block_target).max(1);

    let mut samples = Vec::with_capacity(target);
    let mut block_idx = 0;
    while block_idx < total_blocks && samples.len() < target {
        let start = block_idx * block_size;
        let end = (start + block_size).min(records.len());
        for record in &records[start..end] {
            if samples.len() >= target {
                break;
            }
            samples.push(*record);
        }
        block_idx += interval;
    }
    samples
}

/// Samples whole blocks of `block_size` records at a fixed block interval.
pub fn block_sample(records: &[Record], percent: f64, block_size: usize) -> Result<Vec<Record>> {
    require_nonzero(block_size, "block_size")?;

    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Ok(Vec::new());
    }
    if target == records.len() {
        return Ok(records.to_vec());
    }

    Ok(select_blocks(records, percent, target, block_size))
}

/// Block sampling with the block size derived from a page size in bytes:
/// `page_size / Record::WIRE_SIZE`, clamped to at least one record.
pub fn page_sample(records: &[Record], percent: f64, page_size: usize) -> Result<Vec<Record>> {
    require_nonzero(page_size, "page_size")?;
    let block_size = (page_size / Record::WIRE_SIZE).max(1);
    block_sample(records, percent, block_size)
}

/// Parallel block sampling: the chosen blocks are divided among worker
/// threads, each copying its share into a local buffer; buffers merge under
/// one mutex after all workers finish.
pub fn parallel_block_sample(
    records: &[Record],
    percent: f64,
    block_size: usize,
    num_threads: usize,
) -> Result<Vec<Record>> {
    require_nonzero(block_size, "block_size")?;

    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Ok(Vec::new());
    }
    if target == records.len() {
        return Ok(records.to_vec());
    }

    let total_blocks = records.len().div_ceil(block_size);
    let block_target = ((total_blocks as f64 * percent / 100.0).ceil() as usize).max(1);
    let interval = (total_blocks / block_target).max(1);

    let threads = num_threads.max(1).min(block_target);
    let blocks_per_thread = block_target.div_ceil(threads);
    let merged = Mutex::new(Vec::with_capacity(target));

    thread::scope(|s| {
        for t in 0..threads {
            let merged = &merged;
            s.spawn(move || {
                let first = t * blocks_per_thread;
                let last = ((t + 1) * blocks_per_thread).min(block_target);
                // Per-thread record share; the last worker absorbs the
                // remainder.
                let local_target = if t == threads - 1 {
                    target - (threads - 1) * (target / threads)
                } else {
                    target / threads
                };

                let mut local = Vec::with_capacity(local_target);
                for chosen in first..last {
                    if local.len() >= local_target {
                        break;
                    }
                    let block_idx = chosen * interval;
                    if block_idx >= total_blocks {
                        break;
                    }
                    let start = block_idx * block_size;
                    let end = (start + block_size).min(records.len());
                    for record in &records[start..end] {
                        if local.len() >= local_target {
                            break;
                        }
                        local.push(*record);
                    }
                }
                merged.lock().extend_from_slice(&local);
            });
        }
    });

    let mut samples = merged.into_inner();
    samples.truncate(target);
    Ok(samples)
}

/// Stratified block sampling: stable-sorts a copy by `amount`, splits it
/// into `strata_count` equal strata (the last absorbs the remainder), and
/// block-samples each stratum for an equal share of the target. Reduces
/// variance under heavy-tailed amounts.
pub fn stratified_block_sample(
    records: &[Record],
    percent: f64,
    block_size: usize,
    strata_count: usize,
) -> Result<Vec<Record>> {
    require_nonzero(block_size, "block_size")?;
    require_nonzero(strata_count, "strata_count")?;

    let target = sample_target(records.len(), percent);
    if target == 0 {
        return Ok(Vec::new());
    }
    if target == records.len() {
        return Ok(records.to_vec());
    }

    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| a.amount.total_cmp(&b.amount));

    let strata = strata_count.min(sorted.len());
    let stratum_size = sorted.len() / strata;
    let per_stratum = (target / strata).max(1);

    let mut samples = Vec::with_capacity(target);
    for stratum in 0..strata {
        if samples.len() >= target {
            break;
        }
        let start = stratum * stratum_size;
        let end = if stratum == strata - 1 {
            sorted.len()
        } else {
            start + stratum_size
        };
        let quota = per_stratum.min(target - samples.len());
        samples.extend(select_blocks(&sorted[start..end], percent, quota, block_size));
    }
    Ok(samples)
}

/// Adaptive block sampling: the sequence is split into ten zones (the last
/// absorbs the remainder) and the per-zone variance of `amount` picks a
/// block size linearly interpolated between `min_block_size` (the highest
/// variance zone) and `max_block_size` (zero variance). When every zone has
/// zero variance there is nothing to adapt to, and all zones fall back to
/// `max_block_size`.
pub fn adaptive_block_sample(
    records: &[Record],
    percent: f64,
    min_block_size: usize,
    max_block_size: usize,
) -> Result<Vec<Record>> {
    require_nonzero(min_block_size, "min_block_size")?;
    if max_block_size < min_block_size {
        return Err(ProbeError::InvalidArgument(format!(
            "max_block_size {} below min_block_size {}",
            max_block_size, min_block_size
        )));
    }

    let n = records.len();
    let target = sample_target(n, percent);
    if target == 0 {
        return Ok(Vec::new());
    }
    if target == n {
        return Ok(records.to_vec());
    }

    let zone_size = (n / ADAPTIVE_ZONES).max(1);
    let zone_count = n.div_ceil(zone_size).min(ADAPTIVE_ZONES);

    let zone_bounds = |zone: usize| -> (usize, usize) {
        let start = zone * zone_size;
        let end = if zone == zone_count - 1 {
            n
        } else {
            (start + zone_size).min(n)
        };
        (start, end)
    };

    // Population variance of amount per zone.
    let mut variances = Vec::with_capacity(zone_count);
    for zone in 0..zone_count {
        let (start, end) = zone_bounds(zone);
        let count = (end - start) as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for record in &records[start..end] {
            sum += record.amount;
            sum_sq += record.amount * record.amount;
        }
        let mean = sum / count;
        variances.push((sum_sq / count - mean * mean).max(0.0));
    }
    let max_variance = variances.iter().cloned().fold(0.0, f64::max);

    let mut samples = Vec::with_capacity(target);
    for zone in 0..zone_count {
        if samples.len() >= target {
            break;
        }
        let (start, end) = zone_bounds(zone);

        let ratio = if max_variance > 0.0 {
            variances[zone] / max_variance
        } else {
            0.0
        };
        let span = (max_block_size - min_block_size) as f64;
        let zone_block = min_block_size + (span * (1.0 - ratio)) as usize;

        // Walk the zone block by block, taking the sampled share from the
        // head of each block.
        let mut i = start;
        while i < end && samples.len() < target {
            let block_end = (i + zone_block).min(end);
            let block_len = block_end - i;
            let take = ((block_len as f64 * percent / 100.0) as usize).max(1);
            for record in &records[i..(i + take).min(block_end)] {
                if samples.len() >= target {
                    break;
                }
                samples.push(*record);
            }
            i += zone_block;
        }
    }
    Ok(samples)
}
