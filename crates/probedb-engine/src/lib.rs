//! Query engine for ProbeDB.
//!
//! This crate provides:
//! - A parser for the restricted aggregate SQL dialect
//! - The planner that dispatches exact versus approximate paths, scales
//!   sampled reductions, and computes confidence intervals
//! - The scheduler façade embedders talk to

pub mod parser;
pub mod planner;
pub mod scheduler;

pub use parser::{parse_query, AmountBound, Query};
pub use planner::{
    run_aggregate, run_aggregate_with_ci, run_groupby, run_groupby_with_ci, AggregateOutcome,
    ConfidenceInterval,
};
pub use scheduler::{BenchmarkResults, Scheduler, ValidationResult};
