use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics the executor reports for one completed statement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementMetrics {
    pub rows_examined: u64,
    pub rows_sent: u64,
    pub rows_affected: u64,
    pub duration_us: u64,
}

impl StatementMetrics {
    /// Metrics for a read that examined `rows_examined` rows and returned `rows_sent`.
    pub fn read(rows_examined: u64, rows_sent: u64) -> Self {
        Self {
            rows_examined,
            rows_sent,
            ..Default::default()
        }
    }

    /// Metrics for a write that examined `rows_examined` rows and changed `rows_affected`.
    pub fn write(rows_examined: u64, rows_affected: u64) -> Self {
        Self {
            rows_examined,
            rows_affected,
            ..Default::default()
        }
    }

    /// Set the elapsed time, truncated to whole microseconds.
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self
    }
}

/// Accumulated counters for one workload key.
///
/// Lives behind the entry's mutex in the counter table; every field moves
/// together so a reader never sees a half-applied statement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Totals {
    pub n_queries: u64,
    pub rows_examined: u64,
    pub rows_sent: u64,
    pub rows_affected: u64,
    pub duration_us: u64,
}

impl Totals {
    /// Fold one statement into the totals.
    ///
    /// Returns `None` and leaves `self` untouched if any sum would overflow.
    pub fn checked_apply(&mut self, m: &StatementMetrics) -> Option<()> {
        let next = Totals {
            n_queries: self.n_queries.checked_add(1)?,
            rows_examined: self.rows_examined.checked_add(m.rows_examined)?,
            rows_sent: self.rows_sent.checked_add(m.rows_sent)?,
            rows_affected: self.rows_affected.checked_add(m.rows_affected)?,
            duration_us: self.duration_us.checked_add(m.duration_us)?,
        };
        *self = next;
        Some(())
    }
}

/// One coherent row read out of the counter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadCounters {
    pub workload: String,
    pub n_queries: u64,
    pub rows_examined: u64,
    pub rows_sent: u64,
    pub rows_affected: u64,
    pub duration_us: u64,
}

impl WorkloadCounters {
    pub(crate) fn from_totals(workload: &str, t: Totals) -> Self {
        Self {
            workload: workload.to_string(),
            n_queries: t.n_queries,
            rows_examined: t.rows_examined,
            rows_sent: t.rows_sent,
            rows_affected: t.rows_affected,
            duration_us: t.duration_us,
        }
    }
}
