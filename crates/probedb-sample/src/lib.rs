//! Sampling strategies for ProbeDB.
//!
//! Every strategy consumes the in-order record sequence (the leaf-chain
//! materialization cached by the store) or walks the tree directly, and
//! produces a subsequence of roughly `N * percent / 100` records. The
//! common contract:
//!
//! - `percent >= 100` returns the full sequence, `percent <= 0` returns
//!   nothing, and an empty input always yields an empty output
//! - no strategy ever returns more than its target count
//! - strategies are deterministic given an explicit seed
//! - strides and block intervals are clamped to at least 1 after integer
//!   division
//!
//! Strategy families:
//!
//! - [`sequential`]: systematic, fast, dual, and seeded-random selection
//! - [`stride`]: fixed-interval scans, including the partitioned
//!   multithreaded variant and the direct-aggregation hot path
//! - [`block`]: block, page, parallel, stratified, and adaptive block
//!   selection
//! - [`tree_walk`]: strategies that exploit refreshed subtree counts
//! - [`clt`]: parallel controllers that stop early once a Central Limit
//!   Theorem error bound is met

pub mod block;
pub mod clt;
pub mod sequential;
pub mod stats;
pub mod stride;
pub mod tree_walk;

use probedb_common::{CltConfig, Record, Result};
use probedb_store::RecordStore;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use stats::{confidence_for_sample_size, z_score, RunningStats};

/// Number of records a strategy aims to return for a given input length
/// and sampling percentage.
pub fn sample_target(len: usize, percent: f64) -> usize {
    if len == 0 || percent <= 0.0 {
        0
    } else if percent >= 100.0 {
        len
    } else {
        (len as f64 * percent / 100.0) as usize
    }
}

/// Selects a sampling strategy by name and parameters.
///
/// This is the dispatch surface the planner uses; each variant maps to one
/// function in the strategy modules.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Every step-th record from a random offset.
    Systematic,
    /// Systematic with the step multiplied by `step_factor` (>= 2).
    Fast { step_factor: usize },
    /// One third coarse stride plus two thirds offset fine stride.
    Dual,
    /// `target` distinct uniform positions, emitted in index order.
    Random,
    /// Whole blocks of `block_size` records at a fixed block interval.
    Block { block_size: usize },
    /// Block sampling with the block size derived from a page size in bytes.
    Page { page_size: usize },
    /// Chosen blocks split across worker threads.
    ParallelBlock { block_size: usize, num_threads: usize },
    /// Sort by amount, split into strata, block-sample each stratum.
    StratifiedBlock { block_size: usize, strata_count: usize },
    /// Per-zone variance decides the block size between the two bounds.
    AdaptiveBlock { min_block_size: usize, max_block_size: usize },
    /// Proportional subtree allocation with rounding to nearest.
    IndexProportional,
    /// Every k-th leaf taken whole.
    NodeSkip { skip_factor: usize },
    /// Proportional subtree allocation with floor rounding.
    BalancedTree,
    /// Fixed-interval scan from index 0; `stride_bytes` overrides the
    /// record stride when set.
    Stride { stride_bytes: Option<usize> },
    /// Stride scan starting at a random offset inside the first interval.
    RandomStartStride { stride_bytes: Option<usize> },
    /// Contiguous range per worker, stride with random start per range.
    PartitionedStride { num_threads: usize },
    /// Fast/slow worker pool with CLT convergence checks.
    CltValidated(CltConfig),
    /// Low-overhead CLT variant with per-worker early return.
    OptimizedClt(CltConfig),
    /// Fast/slow worker pair coordinated by one stop flag, bounded waits.
    SignalClt { check_interval: usize },
}

/// Runs a strategy against the store.
///
/// Slice strategies read the cached record sequence; tree strategies walk
/// the tree and rely on subtree counts being refreshed (the store refreshes
/// them after batch mutations, see `RecordStore::ensure_subtree_counts`).
pub fn sample_with(
    store: &RecordStore,
    strategy: &Strategy,
    percent: f64,
    seed: u64,
) -> Result<Vec<Record>> {
    match strategy {
        Strategy::Systematic => {
            let records = store.cached_records();
            let mut rng = StdRng::seed_from_u64(seed);
            Ok(sequential::systematic_sample(&records, percent, &mut rng))
        }
        Strategy::Fast { step_factor } => {
            let records = store.cached_records();
            Ok(sequential::fast_sample(&records, percent, *step_factor))
        }
        Strategy::Dual => {
            let records = store.cached_records();
            Ok(sequential::dual_sample(&records, percent))
        }
        Strategy::Random => {
            let records = store.cached_records();
            Ok(sequential::random_sample(&records, percent, seed))
        }
        Strategy::Block { block_size } => {
            let records = store.cached_records();
            block::block_sample(&records, percent, *block_size)
        }
        Strategy::Page { page_size } => {
            let records = store.cached_records();
            block::page_sample(&records, percent, *page_size)
        }
        Strategy::ParallelBlock {
            block_size,
            num_threads,
        } => {
            let records = store.cached_records();
            block::parallel_block_sample(&records, percent, *block_size, *num_threads)
        }
        Strategy::StratifiedBlock {
            block_size,
            strata_count,
        } => {
            let records = store.cached_records();
            block::stratified_block_sample(&records, percent, *block_size, *strata_count)
        }
        Strategy::AdaptiveBlock {
            min_block_size,
            max_block_size,
        } => {
            let records = store.cached_records();
            block::adaptive_block_sample(&records, percent, *min_block_size, *max_block_size)
        }
        Strategy::IndexProportional => {
            Ok(tree_walk::index_proportional_sample(store.tree(), percent))
        }
        Strategy::NodeSkip { skip_factor } => {
            Ok(tree_walk::node_skip_sample(store.tree(), percent, *skip_factor))
        }
        Strategy::BalancedTree => Ok(tree_walk::balanced_tree_sample(store.tree(), percent)),
        Strategy::Stride { stride_bytes } => {
            let records = store.cached_records();
            Ok(stride::stride_sample(&records, percent, *stride_bytes))
        }
        Strategy::RandomStartStride { stride_bytes } => {
            let records = store.cached_records();
            let mut rng = StdRng::seed_from_u64(seed);
            Ok(stride::random_start_stride_sample(
                &records,
                percent,
                *stride_bytes,
                &mut rng,
            ))
        }
        Strategy::PartitionedStride { num_threads } => {
            let records = store.cached_records();
            Ok(stride::partitioned_stride_sample(
                &records,
                percent,
                *num_threads,
                seed,
            ))
        }
        Strategy::CltValidated(config) => {
            let records = store.cached_records();
            Ok(clt::clt_sample(&records, percent, config, seed))
        }
        Strategy::OptimizedClt(config) => {
            let records = store.cached_records();
            Ok(clt::optimized_clt_sample(&records, percent, config, seed))
        }
        Strategy::SignalClt { check_interval } => {
            let records = store.cached_records();
            Ok(clt::signal_clt_sample(&records, percent, *check_interval, seed).0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_target_bounds() {
        assert_eq!(sample_target(0, 10.0), 0);
        assert_eq!(sample_target(1000, 0.0), 0);
        assert_eq!(sample_target(1000, -5.0), 0);
        assert_eq!(sample_target(1000, 100.0), 1000);
        assert_eq!(sample_target(1000, 150.0), 1000);
        assert_eq!(sample_target(1000, 10.0), 100);
        assert_eq!(sample_target(1000, 0.1), 1);
        assert_eq!(sample_target(999, 10.0), 99);
    }

    #[test]
    fn test_sample_with_covers_slice_strategies() {
        let mut store = RecordStore::in_memory();
        store
            .insert_batch(
                (0..2_000)
                    .map(|id| Record::new(id, (id % 100) as f64, (id % 4) as i32, 0, id))
                    .collect(),
            )
            .unwrap();

        let strategies = [
            Strategy::Systematic,
            Strategy::Fast { step_factor: 2 },
            Strategy::Dual,
            Strategy::Random,
            Strategy::Block { block_size: 100 },
            Strategy::Page { page_size: 4096 },
            Strategy::ParallelBlock {
                block_size: 100,
                num_threads: 2,
            },
            Strategy::StratifiedBlock {
                block_size: 50,
                strata_count: 4,
            },
            Strategy::AdaptiveBlock {
                min_block_size: 20,
                max_block_size: 80,
            },
            Strategy::IndexProportional,
            Strategy::NodeSkip { skip_factor: 2 },
            Strategy::BalancedTree,
            Strategy::Stride { stride_bytes: None },
            Strategy::RandomStartStride { stride_bytes: None },
            Strategy::PartitionedStride { num_threads: 4 },
            Strategy::CltValidated(CltConfig::default()),
            Strategy::OptimizedClt(CltConfig::optimized()),
            Strategy::SignalClt { check_interval: 10 },
        ];

        for strategy in &strategies {
            let samples = sample_with(&store, strategy, 10.0, 42).unwrap();
            assert!(
                samples.len() <= 201,
                "{:?} returned {} samples",
                strategy,
                samples.len()
            );
        }
    }

    #[test]
    fn test_sample_with_empty_store() {
        let store = RecordStore::in_memory();
        let samples = sample_with(&store, &Strategy::Systematic, 10.0, 1).unwrap();
        assert!(samples.is_empty());
    }
}
