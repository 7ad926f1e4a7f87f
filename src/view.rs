/// Read-only `workload_instrumentation` relation over the counter table.
///
/// The view owns no data: every read takes a fresh snapshot. Filtering
/// and ordering are left to whoever queries it.
use crate::counters::WorkloadCounters;
use crate::lifecycle::Engine;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

pub const VIEW_NAME: &str = "workload_instrumentation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

impl Column {
    const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self { name, sql_type }
    }
}

pub const COLUMNS: [Column; 6] = [
    Column::new("WORKLOAD", "varchar"),
    Column::new("COUNT_QUERIES", "BIGINT UNSIGNED"),
    Column::new("SUM_ROWS_EXAMINED", "BIGINT UNSIGNED"),
    Column::new("SUM_ROWS_SENT", "BIGINT UNSIGNED"),
    Column::new("SUM_ROWS_AFFECTED", "BIGINT UNSIGNED"),
    Column::new("SUM_DURATION_US", "BIGINT UNSIGNED"),
];

/// Column list for registering the relation with a host catalog.
pub fn table_definition(max_workload_len: usize) -> String {
    COLUMNS
        .iter()
        .map(|c| match c.sql_type {
            "varchar" => format!("`{}` varchar({max_workload_len})", c.name),
            ty => format!("`{}` {ty}", c.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One row of the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ViewRow {
    pub workload: String,
    pub count_queries: u64,
    pub sum_rows_examined: u64,
    pub sum_rows_sent: u64,
    pub sum_rows_affected: u64,
    pub sum_duration_us: u64,
}

impl From<WorkloadCounters> for ViewRow {
    fn from(c: WorkloadCounters) -> Self {
        Self {
            workload: c.workload,
            count_queries: c.n_queries,
            sum_rows_examined: c.rows_examined,
            sum_rows_sent: c.rows_sent,
            sum_rows_affected: c.rows_affected,
            sum_duration_us: c.duration_us,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    NotActive,
    ReadOnly,
}

impl std::fmt::Display for ViewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewError::NotActive => write!(f, "workload instrumentation is not active"),
            ViewError::ReadOnly => write!(f, "{} is read-only", VIEW_NAME),
        }
    }
}

impl std::error::Error for ViewError {}

#[derive(Debug, Clone)]
pub struct WorkloadView {
    engine: Arc<Engine>,
}

impl WorkloadView {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Materialize every counter entry as a row.
    ///
    /// The snapshot is taken against the table that was live when the call
    /// started, even if the engine is deactivated midway.
    pub fn rows(&self) -> Result<Vec<ViewRow>, ViewError> {
        let table = self.engine.table().ok_or(ViewError::NotActive)?;
        Ok(table.snapshot().into_iter().map(ViewRow::from).collect())
    }

    /// Open a positional cursor over a fresh snapshot.
    pub fn open(&self) -> Result<ViewCursor, ViewError> {
        Ok(ViewCursor::new(self.rows()?))
    }

    /// Upper bound on rows, for planners: capacity plus the reserved rows.
    pub fn estimated_row_count(&self) -> u64 {
        self.engine.config().capacity as u64 + 2
    }

    pub fn insert(&self, _row: ViewRow) -> Result<(), ViewError> {
        Err(ViewError::ReadOnly)
    }

    pub fn delete_all_rows(&self) -> Result<(), ViewError> {
        Err(ViewError::ReadOnly)
    }
}

/// Scan state over one snapshot: read sequentially, remember a position,
/// come back to it later.
#[derive(Debug, Clone)]
pub struct ViewCursor {
    rows: Vec<ViewRow>,
    next: usize,
}

impl ViewCursor {
    fn new(rows: Vec<ViewRow>) -> Self {
        Self { rows, next: 0 }
    }

    /// Index of the next row `next()` will return.
    pub fn position(&self) -> usize {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Row at an absolute position, without moving the cursor.
    pub fn row_at(&self, pos: usize) -> Option<&ViewRow> {
        self.rows.get(pos)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Iterator for ViewCursor {
    type Item = ViewRow;

    fn next(&mut self) -> Option<ViewRow> {
        let row = self.rows.get(self.next)?.clone();
        self.next += 1;
        Some(row)
    }
}

/// Render rows as an aligned text table.
pub fn render_table(rows: &[ViewRow]) -> String {
    let width = rows
        .iter()
        .map(|r| r.workload.len())
        .chain(std::iter::once(COLUMNS[0].name.len()))
        .max()
        .unwrap_or_default();

    let mut out = String::new();
    let _ = write!(out, "{:<width$}", COLUMNS[0].name);
    for c in &COLUMNS[1..] {
        let _ = write!(out, " {:>18}", c.name);
    }
    out.push('\n');
    out.push_str(&"-".repeat(width + 19 * (COLUMNS.len() - 1)));
    out.push('\n');

    for r in rows {
        let _ = writeln!(
            out,
            "{:<width$} {:>18} {:>18} {:>18} {:>18} {:>18}",
            r.workload,
            r.count_queries,
            r.sum_rows_examined,
            r.sum_rows_sent,
            r.sum_rows_affected,
            r.sum_duration_us,
        );
    }
    out
}
