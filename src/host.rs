/// Embedded SQLite executor that reports every completed statement to the
/// statement hook.
///
/// SQLite does not count examined rows the way a server executor does. The
/// session reports full-scan steps, raised to the rows a query returned or,
/// for `UPDATE` and `DELETE`, to the rows it changed. Index lookups that
/// examine rows without returning or changing them are not counted.
use crate::counters::StatementMetrics;
use crate::hook::StatementHook;
use rusqlite::{Connection, Result, StatementStatus};
use std::path::Path;
use std::time::Instant;

/// What the executor measured for one statement, and where it was counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome {
    pub metrics: StatementMetrics,
    /// `None` when the hook did not count the statement.
    pub workload: Option<String>,
}

/// One client session against a SQLite database.
pub struct SqliteSession {
    conn: Connection,
    hook: StatementHook,
}

impl SqliteSession {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path, hook: StatementHook) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(Self { conn, hook })
    }

    pub fn open_in_memory(hook: StatementHook) -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            hook,
        })
    }

    /// Execute one statement, then report it to the hook.
    ///
    /// Statements that fail are returned as errors and never reach the
    /// hook, like statements the host aborts.
    pub fn execute(&self, sql: &str) -> Result<StatementOutcome> {
        let started = Instant::now();
        let changes_before = self.total_changes()?;

        let mut stmt = self.conn.prepare(sql)?;
        let rows_sent = if stmt.column_count() > 0 {
            let mut rows = stmt.query([])?;
            let mut sent = 0u64;
            while rows.next()?.is_some() {
                sent += 1;
            }
            sent
        } else {
            stmt.execute([])?;
            0
        };
        let fullscan_steps =
            u64::try_from(stmt.get_status(StatementStatus::FullscanStep)).unwrap_or(0);
        drop(stmt);

        let rows_affected = self.total_changes()?.saturating_sub(changes_before);
        let mut rows_examined = fullscan_steps.max(rows_sent);
        if changes_existing_rows(sql) {
            rows_examined = rows_examined.max(rows_affected);
        }
        let metrics = StatementMetrics {
            rows_examined,
            rows_sent,
            rows_affected,
            duration_us: 0,
        }
        .with_duration(started.elapsed());

        let workload = self
            .hook
            .statement_completed(sql, metrics)
            .map(|key| key.name().to_string());

        Ok(StatementOutcome { metrics, workload })
    }

    /// Execute each statement of a script in order, stopping at the first
    /// failure.
    pub fn run_script(&self, script: &str) -> Result<Vec<StatementOutcome>> {
        script_statements(script)
            .map(|sql| self.execute(sql))
            .collect()
    }

    fn total_changes(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

/// Whether `sql` is an `UPDATE` or `DELETE`, which must read every row it
/// changes. Leading whitespace and block comments are skipped.
fn changes_existing_rows(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    while let Some(body) = rest.strip_prefix("/*") {
        let Some(end) = body.find("*/") else {
            return false;
        };
        rest = body[end + 2..].trim_start();
    }
    let keyword = rest
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    keyword.eq_ignore_ascii_case("update") || keyword.eq_ignore_ascii_case("delete")
}

/// Split a script into statements: one per non-blank line, skipping
/// `--` comment lines.
pub fn script_statements(script: &str) -> impl Iterator<Item = &str> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
}
