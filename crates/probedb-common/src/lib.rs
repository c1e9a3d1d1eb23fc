//! ProbeDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all ProbeDB components.

pub mod config;
pub mod error;
pub mod record;
pub mod types;

pub use config::{BlockConfig, CltConfig, SampleConfig};
pub use error::{ProbeError, Result};
pub use record::Record;
pub use types::{AggregateKind, ApproximationStatus};
