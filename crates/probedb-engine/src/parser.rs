//! Restricted SQL parsing.
//!
//! The accepted dialect is
//! `SELECT <agg>(<col>) FROM <table> [WHERE <expr>] [GROUP BY <col>]`
//! with `<agg>` one of SUM, COUNT, AVG. The WHERE expression is carried as
//! opaque text; the engine interprets only the amount-range forms it needs
//! concrete bounds for:
//!
//! - `amount BETWEEN x AND y` (inclusive)
//! - `amount >= x AND amount <= y` (inclusive)
//! - `amount > x` (strict, unbounded above)

use probedb_common::{AggregateKind, ProbeError, Result};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

/// A parsed aggregate query.
#[derive(Debug, Clone)]
pub struct Query {
    /// The aggregate function.
    pub agg: AggregateKind,
    /// Column the aggregate operates on (`*` only for COUNT).
    pub column: String,
    /// Table name; informational, the engine owns a single table.
    pub table: String,
    /// Raw WHERE expression text, if present.
    pub where_clause: Option<String>,
    /// GROUP BY column, if present.
    pub group_by: Option<String>,
    /// Sampling percentage; 0 selects the exact path.
    pub sample_percent: f64,
}

/// Interpreted amount predicate extracted from a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountBound {
    /// `lo <= amount <= hi`.
    Range { lo: f64, hi: f64 },
    /// `amount > lo`, strict.
    Above { lo: f64 },
}

impl AmountBound {
    /// Returns true if an amount satisfies the predicate.
    #[inline]
    pub fn matches(&self, amount: f64) -> bool {
        match self {
            AmountBound::Range { lo, hi } => amount >= *lo && amount <= *hi,
            AmountBound::Above { lo } => amount > *lo,
        }
    }
}

fn select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*SELECT\s+([A-Za-z]+)\s*\(\s*(\*|[A-Za-z_][A-Za-z0-9_]*)\s*\)\s+FROM\s+([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$",
        )
        .expect("select regex")
    })
}

fn group_by_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bGROUP\s+BY\s+([A-Za-z_][A-Za-z0-9_]*)").expect("group by regex")
    })
}

fn where_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bWHERE\s+(.+?)(?:\s+GROUP\s+BY\b|\s*$)").expect("where regex")
    })
}

/// Parses a SQL string into a [`Query`].
///
/// Rejects aggregates other than SUM/COUNT/AVG, `*` outside COUNT, and
/// sampling percentages outside `[0, 100]`.
pub fn parse_query(sql: &str, sample_percent: f64) -> Result<Query> {
    if !(0.0..=100.0).contains(&sample_percent) {
        return Err(ProbeError::SamplePercentOutOfRange(sample_percent));
    }

    let captures = select_re().captures(sql).ok_or_else(|| {
        ProbeError::ParseError(format!("unrecognized query shape: {}", sql.trim()))
    })?;

    let agg = AggregateKind::from_str(&captures[1])?;
    let column = captures[2].to_string();
    if column == "*" && agg != AggregateKind::Count {
        return Err(ProbeError::InvalidArgument(format!(
            "{}(*) is not supported",
            agg
        )));
    }

    let table = captures[3].to_string();
    let tail = captures[4].to_string();

    let where_clause = where_re()
        .captures(&tail)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty());
    let group_by = group_by_re().captures(&tail).map(|c| c[1].to_string());

    Ok(Query {
        agg,
        column,
        table,
        where_clause,
        group_by,
        sample_percent,
    })
}

/// Extracts concrete amount bounds from a WHERE expression, if it matches
/// one of the interpreted forms. Anything else returns None and is treated
/// as opaque.
pub fn extract_amount_bounds(where_clause: &str) -> Option<AmountBound> {
    static BETWEEN: OnceLock<Regex> = OnceLock::new();
    static RANGE: OnceLock<Regex> = OnceLock::new();
    static ABOVE: OnceLock<Regex> = OnceLock::new();

    let between = BETWEEN.get_or_init(|| {
        Regex::new(r"(?i)amount\s+BETWEEN\s+(\d+(?:\.\d+)?)\s+AND\s+(\d+(?:\.\d+)?)")
            .expect("between regex")
    });
    let range = RANGE.get_or_init(|| {
        Regex::new(r"(?i)amount\s*>=\s*(\d+(?:\.\d+)?)\s+AND\s+amount\s*<=\s*(\d+(?:\.\d+)?)")
            .expect("range regex")
    });
    let above = ABOVE.get_or_init(|| {
        Regex::new(r"(?i)amount\s*>\s*(\d+(?:\.\d+)?)").expect("above regex")
    });

    if let Some(c) = between.captures(where_clause) {
        return Some(AmountBound::Range {
            lo: c[1].parse().ok()?,
            hi: c[2].parse().ok()?,
        });
    }
    if let Some(c) = range.captures(where_clause) {
        return Some(AmountBound::Range {
            lo: c[1].parse().ok()?,
            hi: c[2].parse().ok()?,
        });
    }
    if let Some(c) = above.captures(where_clause) {
        return Some(AmountBound::Above {
            lo: c[1].parse().ok()?,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_sum() {
        let q = parse_query("SELECT SUM(amount) FROM sales", 10.0).unwrap();
        assert_eq!(q.agg, AggregateKind::Sum);
        assert_eq!(q.column, "amount");
        assert_eq!(q.table, "sales");
        assert!(q.where_clause.is_none());
        assert!(q.group_by.is_none());
        assert_eq!(q.sample_percent, 10.0);
    }

    #[test]
    fn test_parse_case_insensitive() {
        let q = parse_query("select avg(Amount) from Sales", 5.0).unwrap();
        assert_eq!(q.agg, AggregateKind::Avg);
        assert_eq!(q.column, "Amount");
    }

    #[test]
    fn test_parse_count_star() {
        let q = parse_query("SELECT COUNT(*) FROM t", 0.0).unwrap();
        assert_eq!(q.agg, AggregateKind::Count);
        assert_eq!(q.column, "*");
    }

    #[test]
    fn test_parse_star_rejected_for_sum_and_avg() {
        assert!(parse_query("SELECT SUM(*) FROM t", 0.0).is_err());
        assert!(parse_query("SELECT AVG(*) FROM t", 0.0).is_err());
    }

    #[test]
    fn test_parse_where_clause() {
        let q = parse_query(
            "SELECT SUM(amount) FROM t WHERE amount BETWEEN 10 AND 90",
            5.0,
        )
        .unwrap();
        assert_eq!(q.where_clause.as_deref(), Some("amount BETWEEN 10 AND 90"));
    }

    #[test]
    fn test_parse_group_by() {
        let q = parse_query("SELECT SUM(amount) FROM t GROUP BY region", 10.0).unwrap();
        assert_eq!(q.group_by.as_deref(), Some("region"));
        assert!(q.where_clause.is_none());
    }

    #[test]
    fn test_parse_where_and_group_by() {
        let q = parse_query(
            "SELECT AVG(amount) FROM t WHERE amount > 50 GROUP BY product_id",
            2.0,
        )
        .unwrap();
        assert_eq!(q.where_clause.as_deref(), Some("amount > 50"));
        assert_eq!(q.group_by.as_deref(), Some("product_id"));
    }

    #[test]
    fn test_parse_rejects_unsupported_aggregate() {
        let err = parse_query("SELECT MEDIAN(amount) FROM t", 10.0).unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedAggregate(_)));
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        assert!(parse_query("DELETE FROM t", 10.0).is_err());
        assert!(parse_query("SELECT amount FROM t", 10.0).is_err());
        assert!(parse_query("", 10.0).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_percent() {
        for percent in [-1.0, 100.5, 1000.0] {
            let err = parse_query("SELECT SUM(amount) FROM t", percent).unwrap_err();
            assert!(matches!(err, ProbeError::SamplePercentOutOfRange(_)));
        }
    }

    #[test]
    fn test_extract_between_bounds() {
        let bound = extract_amount_bounds("amount BETWEEN 10 AND 90.5").unwrap();
        assert_eq!(bound, AmountBound::Range { lo: 10.0, hi: 90.5 });
        assert!(bound.matches(10.0));
        assert!(bound.matches(90.5));
        assert!(!bound.matches(9.99));
        assert!(!bound.matches(90.51));
    }

    #[test]
    fn test_extract_range_bounds() {
        let bound = extract_amount_bounds("amount >= 5 AND amount <= 15").unwrap();
        assert_eq!(bound, AmountBound::Range { lo: 5.0, hi: 15.0 });
    }

    #[test]
    fn test_extract_strict_greater_bound() {
        let bound = extract_amount_bounds("amount > 50").unwrap();
        assert_eq!(bound, AmountBound::Above { lo: 50.0 });
        assert!(!bound.matches(50.0));
        assert!(bound.matches(50.000001));
    }

    #[test]
    fn test_extract_opaque_expression() {
        assert!(extract_amount_bounds("region = 3").is_none());
        assert!(extract_amount_bounds("").is_none());
    }
}
