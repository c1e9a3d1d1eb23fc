//! Shared enumerations for query execution.

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};

/// The aggregate functions supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    /// SUM(column), scaled by `100 / sample_percent` when approximated.
    Sum,
    /// COUNT(column), scaled by `100 / sample_percent` when approximated.
    Count,
    /// AVG(column), never scaled.
    Avg,
}

impl AggregateKind {
    /// Returns true if an approximate result must be scaled up by the
    /// inverse sampling rate.
    pub fn needs_scaling(&self) -> bool {
        !matches!(self, AggregateKind::Avg)
    }
}

impl std::str::FromStr for AggregateKind {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" => Ok(AggregateKind::Sum),
            "COUNT" => Ok(AggregateKind::Count),
            "AVG" => Ok(AggregateKind::Avg),
            other => Err(ProbeError::UnsupportedAggregate(other.to_string())),
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateKind::Sum => "SUM",
            AggregateKind::Count => "COUNT",
            AggregateKind::Avg => "AVG",
        };
        write!(f, "{}", name)
    }
}

/// Outcome classification attached to every approximate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproximationStatus {
    /// Estimate accepted.
    Stable,
    /// The slow validator disagrees with the running estimate, or a
    /// coordination timeout returned partial results.
    Drifting,
    /// Fewer than the minimum number of samples were collected.
    InsufficientData,
    /// An error occurred during execution.
    Error,
}

impl std::fmt::Display for ApproximationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ApproximationStatus::Stable => "STABLE",
            ApproximationStatus::Drifting => "DRIFTING",
            ApproximationStatus::InsufficientData => "INSUFFICIENT_DATA",
            ApproximationStatus::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_aggregate_from_str() {
        assert_eq!(AggregateKind::from_str("SUM").unwrap(), AggregateKind::Sum);
        assert_eq!(AggregateKind::from_str("sum").unwrap(), AggregateKind::Sum);
        assert_eq!(
            AggregateKind::from_str("Count").unwrap(),
            AggregateKind::Count
        );
        assert_eq!(AggregateKind::from_str("AVG").unwrap(), AggregateKind::Avg);
    }

    #[test]
    fn test_aggregate_from_str_rejects_unknown() {
        for bad in ["MIN", "MAX", "MEDIAN", ""] {
            assert!(AggregateKind::from_str(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_aggregate_display() {
        assert_eq!(AggregateKind::Sum.to_string(), "SUM");
        assert_eq!(AggregateKind::Count.to_string(), "COUNT");
        assert_eq!(AggregateKind::Avg.to_string(), "AVG");
    }

    #[test]
    fn test_needs_scaling() {
        assert!(AggregateKind::Sum.needs_scaling());
        assert!(AggregateKind::Count.needs_scaling());
        assert!(!AggregateKind::Avg.needs_scaling());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ApproximationStatus::Stable.to_string(), "STABLE");
        assert_eq!(ApproximationStatus::Drifting.to_string(), "DRIFTING");
        assert_eq!(
            ApproximationStatus::InsufficientData.to_string(),
            "INSUFFICIENT_DATA"
        );
        assert_eq!(ApproximationStatus::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_serde_roundtrip() {
        for status in [
            ApproximationStatus::Stable,
            ApproximationStatus::Drifting,
            ApproximationStatus::InsufficientData,
            ApproximationStatus::Error,
        ] {
            let serialized = serde_json::to_string(&status).unwrap();
            let deserialized: ApproximationStatus = serde_json::from_str(&serialized).unwrap();
            assert_eq!(status, deserialized);
        }
    }
}
