//! Scheduler façade: the stable outward API of the engine.
//!
//! One scheduler owns one record store behind a readers-writer lock.
//! Queries take a shared lock for their whole run; mutations and snapshot
//! management take the exclusive lock. No error crosses this boundary:
//! every `execute_*` returns a [`ValidationResult`] whose status encodes
//! the failure class instead.

use crate::parser::{self, Query};
use crate::planner::{self, AggregateOutcome, ConfidenceInterval};
use parking_lot::RwLock;
use probedb_common::{AggregateKind, ApproximationStatus, Record, Result, SampleConfig};
use probedb_sample::{confidence_for_sample_size, sample_with, Strategy};
use probedb_store::RecordStore;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result envelope for every approximate or exact query execution.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// The aggregate value (0.0 on failure).
    pub value: f64,
    /// Outcome classification.
    pub status: ApproximationStatus,
    /// Confidence attributed to the sample size (1.0 for exact results).
    pub confidence_level: f64,
    /// Nominal error margin: the sampling fraction for approximate runs,
    /// 0 for exact ones.
    pub error_margin: f64,
    /// Records consumed by the reduction.
    pub samples_used: usize,
    /// Wall-clock time of the execution.
    pub computation_time: Duration,
}

/// Exact-versus-approximate comparison for one aggregate kind.
#[derive(Debug, Clone)]
pub struct BenchmarkResults {
    pub exact_value: f64,
    pub approximate_value: f64,
    pub exact_time_ms: f64,
    pub approximate_time_ms: f64,
    pub speedup: f64,
    pub error_percentage: f64,
    pub threads_used: usize,
    pub sample_percentage: f64,
}

/// The engine façade. Owns exactly one tree-backed store.
pub struct Scheduler {
    store: RwLock<RecordStore>,
    config: SampleConfig,
    error_threshold: f64,
}

impl Scheduler {
    /// Creates a scheduler with an empty in-memory store and default
    /// sampling configuration.
    pub fn new() -> Self {
        Self::with_error_threshold(0.05)
    }

    /// Creates a scheduler with a custom acceptable-error threshold used
    /// by benchmark validation.
    pub fn with_error_threshold(error_threshold: f64) -> Self {
        Self {
            store: RwLock::new(RecordStore::in_memory()),
            config: SampleConfig::default(),
            error_threshold,
        }
    }

    // =========================================================================
    // Database management
    // =========================================================================

    /// Replaces the store with a fresh one that flushes to `path` on close.
    pub fn create_database<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        *self.store.write() = RecordStore::create(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Replaces the store with one rebuilt from a snapshot file.
    pub fn open_database<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        *self.store.write() = RecordStore::open(path.as_ref().to_path_buf())?;
        Ok(())
    }

    /// Flushes to the snapshot file, if a path was set.
    pub fn close_database(&self) -> Result<()> {
        self.store.read().close()
    }

    /// Inserts one record.
    pub fn insert_record(
        &self,
        id: i64,
        amount: f64,
        region: i32,
        product_id: i32,
        timestamp: i64,
    ) -> Result<()> {
        self.store
            .write()
            .insert(Record::new(id, amount, region, product_id, timestamp))
    }

    /// Inserts a batch of records.
    pub fn insert_batch(&self, records: Vec<Record>) -> Result<()> {
        self.store.write().insert_batch(records)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Total records in the store.
    pub fn get_total_records(&self) -> u64 {
        self.store.read().total_records()
    }

    /// Height of the underlying tree.
    pub fn get_tree_height(&self) -> u32 {
        self.store.read().tree_height()
    }

    /// Logical dataset size in megabytes (wire-format records).
    pub fn get_database_size_mb(&self) -> f64 {
        let records = self.get_total_records() as f64;
        records * Record::WIRE_SIZE as f64 / (1024.0 * 1024.0)
    }

    // =========================================================================
    // Query execution
    // =========================================================================

    /// Executes a SUM query approximately.
    pub fn execute_sum_query(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> ValidationResult {
        self.run_validated(sample_percent, |store, seed| {
            let query = parser::parse_query(sql, sample_percent)?;
            planner::run_aggregate(store, &query, num_threads, seed)
        })
    }

    /// Executes an AVG query approximately.
    pub fn execute_avg_query(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> ValidationResult {
        self.run_validated(sample_percent, |store, seed| {
            let query = parser::parse_query(sql, sample_percent)?;
            planner::run_aggregate(store, &query, num_threads, seed)
        })
    }

    /// Executes a COUNT query approximately.
    pub fn execute_count_query(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> ValidationResult {
        self.run_validated(sample_percent, |store, seed| {
            let query = parser::parse_query(sql, sample_percent)?;
            planner::run_aggregate(store, &query, num_threads, seed)
        })
    }

    /// Executes SUM over an inclusive amount range approximately.
    pub fn execute_sum_where_query(
        &self,
        min_amount: f64,
        max_amount: f64,
        sample_percent: f64,
        num_threads: usize,
    ) -> ValidationResult {
        self.run_validated(sample_percent, |store, seed| {
            let query = Query {
                agg: AggregateKind::Sum,
                column: "amount".to_string(),
                table: "t".to_string(),
                where_clause: Some(format!(
                    "amount >= {} AND amount <= {}",
                    min_amount, max_amount
                )),
                group_by: None,
                sample_percent,
            };
            planner::run_aggregate(store, &query, num_threads, seed)
        })
    }

    /// Exact SUM over every record.
    pub fn execute_exact_sum(&self) -> ValidationResult {
        self.run_validated(0.0, |store, _| {
            Ok(AggregateOutcome {
                value: store.tree().sum_amount(),
                samples_used: store.total_records() as usize,
            })
        })
    }

    /// Exact AVG over every record.
    pub fn execute_exact_avg(&self) -> ValidationResult {
        self.run_validated(0.0, |store, _| {
            Ok(AggregateOutcome {
                value: store.tree().avg_amount(),
                samples_used: store.total_records() as usize,
            })
        })
    }

    /// Exact COUNT.
    pub fn execute_exact_count(&self) -> ValidationResult {
        self.run_validated(0.0, |store, _| {
            Ok(AggregateOutcome {
                value: store.tree().count_records() as f64,
                samples_used: store.total_records() as usize,
            })
        })
    }

    /// Exact SUM over an inclusive amount range.
    pub fn execute_exact_sum_where(&self, min_amount: f64, max_amount: f64) -> ValidationResult {
        self.run_validated(0.0, |store, _| {
            Ok(AggregateOutcome {
                value: store.tree().sum_amount_where(min_amount, max_amount),
                samples_used: store.total_records() as usize,
            })
        })
    }

    /// Parses and runs a query, returning the bare value.
    pub fn execute_query(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> Result<f64> {
        let query = parser::parse_query(sql, sample_percent)?;
        let store = self.read_store();
        planner::run_aggregate(&store, &query, num_threads, self.config.seed)
            .map(|outcome| outcome.value)
    }

    /// Parses and runs a query, returning the value with its 95% CI.
    pub fn execute_query_with_ci(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> Result<(f64, ConfidenceInterval)> {
        let query = parser::parse_query(sql, sample_percent)?;
        let store = self.read_store();
        planner::run_aggregate_with_ci(&store, &query, num_threads, self.config.seed)
            .map(|(outcome, ci)| (outcome.value, ci))
    }

    /// Parses and runs a GROUP BY query.
    pub fn execute_query_groupby(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> Result<HashMap<String, f64>> {
        let query = parser::parse_query(sql, sample_percent)?;
        let store = self.read_store();
        planner::run_groupby(&store, &query, num_threads, self.config.seed)
    }

    /// Parses and runs a GROUP BY query with a CI per group.
    pub fn execute_query_groupby_with_ci(
        &self,
        sql: &str,
        sample_percent: f64,
        num_threads: usize,
    ) -> Result<HashMap<String, ConfidenceInterval>> {
        let query = parser::parse_query(sql, sample_percent)?;
        let store = self.read_store();
        planner::run_groupby_with_ci(&store, &query, num_threads, self.config.seed)
    }

    /// Draws a sample with an explicit strategy from the library.
    pub fn sample_records(&self, strategy: &Strategy, sample_percent: f64) -> Result<Vec<Record>> {
        let store = self.read_store();
        sample_with(&store, strategy, sample_percent, self.config.seed)
    }

    // =========================================================================
    // Benchmarking
    // =========================================================================

    /// Runs the exact and approximate paths back to back for one aggregate
    /// kind and reports timings, speedup, and relative error.
    pub fn benchmark_query(
        &self,
        kind: AggregateKind,
        sample_percent: f64,
        num_threads: usize,
    ) -> BenchmarkResults {
        let (exact, approx) = match kind {
            AggregateKind::Sum => (
                self.execute_exact_sum(),
                self.execute_sum_query("SELECT SUM(amount) FROM t", sample_percent, num_threads),
            ),
            AggregateKind::Avg => (
                self.execute_exact_avg(),
                self.execute_avg_query("SELECT AVG(amount) FROM t", sample_percent, num_threads),
            ),
            AggregateKind::Count => (
                self.execute_exact_count(),
                self.execute_count_query("SELECT COUNT(*) FROM t", sample_percent, num_threads),
            ),
        };

        let exact_ms = exact.computation_time.as_secs_f64() * 1000.0;
        let approx_ms = approx.computation_time.as_secs_f64() * 1000.0;
        let error_percentage = if exact.value != 0.0 {
            (exact.value - approx.value).abs() / exact.value.abs() * 100.0
        } else {
            0.0
        };

        BenchmarkResults {
            exact_value: exact.value,
            approximate_value: approx.value,
            exact_time_ms: exact_ms,
            approximate_time_ms: approx_ms,
            speedup: exact_ms / approx_ms.max(f64::EPSILON),
            error_percentage,
            threads_used: num_threads,
            sample_percentage: sample_percent,
        }
    }

    /// Returns true if an approximation stays within the configured
    /// acceptable-error threshold of the exact value.
    pub fn approximation_within_threshold(&self, exact: f64, approximate: f64) -> bool {
        if exact == 0.0 {
            return approximate == 0.0;
        }
        (exact - approximate).abs() / exact.abs() <= self.error_threshold
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Takes the shared lock after refreshing subtree counts if needed, so
    /// tree-walk strategies always see current counts.
    fn read_store(&self) -> parking_lot::RwLockReadGuard<'_, RecordStore> {
        {
            let store = self.store.upgradable_read();
            if store.counts_dirty() {
                let mut store = parking_lot::RwLockUpgradableReadGuard::upgrade(store);
                store.ensure_subtree_counts();
            }
        }
        self.store.read()
    }

    fn run_validated<F>(&self, sample_percent: f64, f: F) -> ValidationResult
    where
        F: FnOnce(&RecordStore, u64) -> Result<AggregateOutcome>,
    {
        let start = Instant::now();
        let store = self.read_store();

        if store.total_records() == 0 {
            return ValidationResult {
                value: 0.0,
                status: ApproximationStatus::InsufficientData,
                confidence_level: 0.0,
                error_margin: 0.0,
                samples_used: 0,
                computation_time: start.elapsed(),
            };
        }

        match f(&store, self.config.seed) {
            Ok(outcome) => {
                debug!(
                    value = outcome.value,
                    samples = outcome.samples_used,
                    percent = sample_percent,
                    "query executed"
                );
                let exact = sample_percent <= 0.0;
                ValidationResult {
                    value: outcome.value,
                    status: ApproximationStatus::Stable,
                    confidence_level: if exact {
                        1.0
                    } else {
                        confidence_for_sample_size(outcome.samples_used)
                    },
                    error_margin: if exact { 0.0 } else { sample_percent / 100.0 },
                    samples_used: outcome.samples_used,
                    computation_time: start.elapsed(),
                }
            }
            Err(err) => {
                warn!(error = %err, "query failed");
                ValidationResult {
                    value: 0.0,
                    status: ApproximationStatus::Error,
                    confidence_level: 0.0,
                    error_margin: 100.0,
                    samples_used: 0,
                    computation_time: start.elapsed(),
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
