/// JSONL statement-log replay.
///
/// Each line is one completed statement as an executor would report it:
///
/// ```text
/// {"query": "SELECT /* WORKLOAD_NAME=api */ 1", "rows_examined": 1, "rows_sent": 1,
///  "duration_us": 80, "session": 2}
/// ```
///
/// Records are spread over concurrent sessions and delivered through the
/// statement hook, in file order within each session.
use crate::counters::StatementMetrics;
use crate::hook::{QueryEvent, QueryEventKind};
use crate::lifecycle::Engine;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

fn default_event() -> QueryEventKind {
    QueryEventKind::StatusEnd
}

/// One line of a statement log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatementRecord {
    pub query: String,
    #[serde(default)]
    pub rows_examined: u64,
    #[serde(default)]
    pub rows_sent: u64,
    #[serde(default)]
    pub rows_affected: u64,
    #[serde(default)]
    pub duration_us: u64,
    /// Session that issued the statement; unassigned records are spread
    /// round-robin.
    #[serde(default)]
    pub session: Option<usize>,
    #[serde(default = "default_event")]
    pub event: QueryEventKind,
}

impl StatementRecord {
    pub fn metrics(&self) -> StatementMetrics {
        StatementMetrics {
            rows_examined: self.rows_examined,
            rows_sent: self.rows_sent,
            rows_affected: self.rows_affected,
            duration_us: self.duration_us,
        }
    }

    pub fn event(&self) -> QueryEvent<'_> {
        QueryEvent {
            kind: self.event,
            query: &self.query,
            metrics: self.metrics(),
        }
    }
}

/// Parsed statement log.
#[derive(Debug, Default)]
pub struct StatementLog {
    pub records: Vec<StatementRecord>,
    /// Lines that were not valid records.
    pub skipped: usize,
}

/// Parse JSONL records, skipping blank and malformed lines.
pub fn parse_log<R: BufRead>(reader: R) -> std::io::Result<StatementLog> {
    let mut log = StatementLog::default();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StatementRecord>(&line) {
            Ok(record) => log.records.push(record),
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "skipping malformed statement record");
                log.skipped += 1;
            }
        }
    }
    Ok(log)
}

/// Read and parse a statement log file.
pub fn load_log(path: &Path) -> Result<StatementLog, ReplayError> {
    let file = std::fs::File::open(path).map_err(|e| ReplayError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_log(std::io::BufReader::new(file)).map_err(|e| ReplayError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub sessions: usize,
    pub delivered: usize,
    /// Records the hook counted; the rest were ignored or lost to faults.
    pub counted: usize,
}

/// Deliver every record through the engine's statement hook from
/// `sessions` concurrent threads.
pub fn replay(engine: &Arc<Engine>, log: &StatementLog, sessions: usize) -> ReplaySummary {
    let sessions = sessions.max(1);
    let mut assigned: Vec<Vec<&StatementRecord>> = vec![Vec::new(); sessions];
    for (i, record) in log.records.iter().enumerate() {
        let slot = record.session.unwrap_or(i) % sessions;
        assigned[slot].push(record);
    }

    let counted: usize = thread::scope(|s| {
        let handles: Vec<_> = assigned
            .iter()
            .map(|records| {
                let hook = engine.hook();
                s.spawn(move || {
                    records
                        .iter()
                        .filter(|r| hook.on_query_event(&r.event()).is_some())
                        .count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .sum()
    });

    let summary = ReplaySummary {
        sessions,
        delivered: log.records.len(),
        counted,
    };
    info!(
        sessions = summary.sessions,
        delivered = summary.delivered,
        counted = summary.counted,
        skipped = log.skipped,
        "replay complete"
    );
    summary
}

#[derive(Debug)]
pub enum ReplayError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Open { path, source } => {
                write!(f, "failed to open statement log {}: {source}", path.display())
            }
            ReplayError::Read { path, source } => {
                write!(f, "failed to read statement log {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Open { source, .. } => Some(source),
            ReplayError::Read { source, .. } => Some(source),
        }
    }
}
