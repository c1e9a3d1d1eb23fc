//! Configuration structures for ProbeDB.

use serde::{Deserialize, Serialize};

/// General sampling configuration shared by all strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Percentage of the record sequence to sample, in (0, 100].
    pub sample_percent: f64,
    /// Number of worker threads for parallel strategies.
    pub num_threads: usize,
    /// Seed for strategies that draw random offsets or positions.
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            sample_percent: 10.0,
            num_threads: 4,
            seed: 42,
        }
    }
}

/// Configuration for CLT-validated sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CltConfig {
    /// Target confidence level (0.90, 0.95, or 0.99).
    pub confidence_level: f64,
    /// Workers re-check convergence every this many local emissions.
    pub check_interval: usize,
    /// Number of worker threads.
    pub num_threads: usize,
    /// Convergence threshold: stop once the margin of error falls below
    /// this percentage of the running mean.
    pub max_error_percent: f64,
}

impl Default for CltConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            check_interval: 10,
            num_threads: 4,
            max_error_percent: 2.0,
        }
    }
}

impl CltConfig {
    /// Configuration tuned for the low-overhead variant: convergence is
    /// checked half as often.
    pub fn optimized() -> Self {
        Self {
            check_interval: 20,
            ..Default::default()
        }
    }
}

/// Configuration for block, page, stratified, and adaptive block sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Records per block for plain block sampling.
    pub block_size: usize,
    /// Page size in bytes for page sampling; converted to a record count.
    pub page_size: usize,
    /// Number of strata for stratified block sampling.
    pub strata_count: usize,
    /// Smallest block used by adaptive sampling (high-variance zones).
    pub min_block_size: usize,
    /// Largest block used by adaptive sampling (low-variance zones).
    pub max_block_size: usize,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            block_size: 1000,
            page_size: 4096,
            strata_count: 4,
            min_block_size: 500,
            max_block_size: 2000,
        }
    }
}
