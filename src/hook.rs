/// Statement completion hook.
///
/// The executor reports query events here once per statement phase. Only
/// the end-of-statement event is counted: its text is run through the tag
/// extractor and its metrics are added to the resolved workload. Nothing
/// that goes wrong in here ever reaches the executor.
use crate::counters::StatementMetrics;
use crate::lifecycle::Engine;
use crate::table::{CounterTable, TableError, WorkloadKey};
use crate::tag::TagExtractor;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Phase of a statement reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEventKind {
    Start,
    NestedStart,
    StatusEnd,
    NestedStatusEnd,
}

/// A query event as delivered by the executor.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvent<'a> {
    pub kind: QueryEventKind,
    pub query: &'a str,
    pub metrics: StatementMetrics,
}

impl<'a> QueryEvent<'a> {
    /// End-of-statement event, the only kind that is counted.
    pub fn completed(query: &'a str, metrics: StatementMetrics) -> Self {
        Self {
            kind: QueryEventKind::StatusEnd,
            query,
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The engine was not active when the event arrived.
    Inactive,
    /// The executor delivered an event kind this hook does not count.
    UnexpectedEvent(QueryEventKind),
    Table(TableError),
    /// Instrumentation panicked; the panic was contained.
    Panicked(String),
}

impl std::fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentError::Inactive => write!(f, "workload instrumentation is not active"),
            InstrumentError::UnexpectedEvent(kind) => {
                write!(f, "got unexpected query event {kind:?}, ignoring it")
            }
            InstrumentError::Table(e) => write!(f, "{e}"),
            InstrumentError::Panicked(msg) => write!(f, "instrumentation panicked: {msg}"),
        }
    }
}

impl std::error::Error for InstrumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstrumentError::Table(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TableError> for InstrumentError {
    fn from(e: TableError) -> Self {
        InstrumentError::Table(e)
    }
}

/// Count one event against `table`. Errors are returned, not logged.
pub fn instrument(
    table: &CounterTable,
    extractor: &TagExtractor,
    event: &QueryEvent<'_>,
) -> Result<WorkloadKey, InstrumentError> {
    if event.kind != QueryEventKind::StatusEnd {
        return Err(InstrumentError::UnexpectedEvent(event.kind));
    }
    let workload = extractor.extract(event.query);
    Ok(table.record(workload, &event.metrics)?)
}

/// Failure boundary around [`instrument`].
///
/// Errors and panics are logged and swallowed. Returns the key the
/// statement was counted under, or `None` if it was not counted.
pub fn dispatch(
    table: Option<&CounterTable>,
    extractor: &TagExtractor,
    event: &QueryEvent<'_>,
) -> Option<WorkloadKey> {
    guarded(|| match table {
        Some(table) => instrument(table, extractor, event),
        None => Err(InstrumentError::Inactive),
    })
}

/// Run `count` so that neither an error nor a panic escapes.
pub(crate) fn guarded<F>(count: F) -> Option<WorkloadKey>
where
    F: FnOnce() -> Result<WorkloadKey, InstrumentError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(count)).unwrap_or_else(|payload| {
        Err(InstrumentError::Panicked(panic_message(payload.as_ref())))
    });

    match result {
        Ok(key) => Some(key),
        Err(InstrumentError::Inactive) => {
            debug!("statement completed while instrumentation inactive, not counted");
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to record statement stats, skipping this statement");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-session handle the executor calls after each statement.
///
/// Cheap to clone; every session holds its own copy pointing at the same
/// engine.
#[derive(Debug, Clone)]
pub struct StatementHook {
    engine: Arc<Engine>,
}

impl StatementHook {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Deliver a query event. Never fails and never panics.
    pub fn on_query_event(&self, event: &QueryEvent<'_>) -> Option<WorkloadKey> {
        self.engine.on_query_event(event)
    }

    /// Shorthand for an end-of-statement event.
    pub fn statement_completed(
        &self,
        query: &str,
        metrics: StatementMetrics,
    ) -> Option<WorkloadKey> {
        self.on_query_event(&QueryEvent::completed(query, metrics))
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::table::{OVERFLOW_WORKLOAD, UNSPECIFIED_WORKLOAD};

    fn active_hook(capacity: usize) -> StatementHook {
        let engine = Arc::new(Engine::new(EngineConfig {
            capacity,
            ..Default::default()
        }));
        engine.activate().unwrap();
        StatementHook::new(engine)
    }

    fn row(hook: &StatementHook, workload: &str) -> crate::counters::WorkloadCounters {
        hook.engine().table().unwrap().get(workload).unwrap()
    }

    #[test]
    fn test_tagged_statement_counted_under_tag() {
        let hook = active_hook(10);
        let key = hook
            .statement_completed(
                "SELECT /* WORKLOAD_NAME=api_endpoint_1 */ * FROM t WHERE id=4",
                StatementMetrics::read(1, 1),
            )
            .unwrap();
        assert_eq!(key.name(), "api_endpoint_1");
        let r = row(&hook, "api_endpoint_1");
        assert_eq!((r.n_queries, r.rows_examined, r.rows_sent), (1, 1, 1));
    }

    #[test]
    fn test_untagged_statement_counted_as_unspecified() {
        let hook = active_hook(10);
        let before = row(&hook, UNSPECIFIED_WORKLOAD).n_queries;
        let key = hook
            .statement_completed("SELECT 1", StatementMetrics::read(0, 1))
            .unwrap();
        assert_eq!(key.name(), UNSPECIFIED_WORKLOAD);
        assert_eq!(row(&hook, UNSPECIFIED_WORKLOAD).n_queries, before + 1);
    }

    #[test]
    fn test_non_end_events_not_counted() {
        let hook = active_hook(10);
        for kind in [
            QueryEventKind::Start,
            QueryEventKind::NestedStart,
            QueryEventKind::NestedStatusEnd,
        ] {
            let event = QueryEvent {
                kind,
                query: "SELECT /* WORKLOAD_NAME=w */ 1",
                metrics: StatementMetrics::read(1, 1),
            };
            assert!(hook.on_query_event(&event).is_none());
        }
        assert!(hook.engine().table().unwrap().get("w").is_none());
    }

    #[test]
    fn test_instrument_reports_unexpected_event() {
        let table = CounterTable::new(10);
        let event = QueryEvent {
            kind: QueryEventKind::Start,
            query: "SELECT 1",
            metrics: StatementMetrics::default(),
        };
        let err = instrument(&table, &TagExtractor::default(), &event).unwrap_err();
        assert_eq!(err, InstrumentError::UnexpectedEvent(QueryEventKind::Start));
    }

    #[test]
    fn test_inactive_engine_swallows_event() {
        let hook = active_hook(10);
        hook.engine().deactivate().unwrap();
        assert!(hook
            .statement_completed("SELECT 1", StatementMetrics::read(1, 1))
            .is_none());
    }

    #[test]
    fn test_counter_overflow_swallowed() {
        let hook = active_hook(10);
        let huge = StatementMetrics {
            rows_sent: u64::MAX,
            ..Default::default()
        };
        let sql = "SELECT /* WORKLOAD_NAME=big */ 1";
        assert!(hook.statement_completed(sql, huge).is_some());
        assert!(hook.statement_completed(sql, StatementMetrics::read(0, 1)).is_none());
        assert_eq!(row(&hook, "big").n_queries, 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_panic_inside_boundary_is_contained() {
        let table = CounterTable::new(4);
        let extractor = TagExtractor::default();

        assert!(guarded(|| panic!("instrumentation bug")).is_none());
        assert!(guarded(|| {
            let key = table.resolve_or_route(Some("w"));
            table.increment(&key, &StatementMetrics::read(1, 1))?;
            panic!("failed after counting")
        })
        .is_none());

        let event =
            QueryEvent::completed("SELECT /* WORKLOAD_NAME=w */ 1", StatementMetrics::read(2, 2));
        let key = dispatch(Some(&table), &extractor, &event).unwrap();
        assert_eq!(key.name(), "w");
        let r = table.get("w").unwrap();
        assert_eq!((r.n_queries, r.rows_examined), (2, 3));
    }

    #[test]
    fn test_overflow_routing_through_hook() {
        let hook = active_hook(1);
        hook.statement_completed("SELECT /* WORKLOAD_NAME=a */ 1", StatementMetrics::read(1, 1));
        let key = hook
            .statement_completed("SELECT /* WORKLOAD_NAME=b */ 1", StatementMetrics::read(1, 1))
            .unwrap();
        assert_eq!(key.name(), OVERFLOW_WORKLOAD);
        assert_eq!(row(&hook, OVERFLOW_WORKLOAD).n_queries, 1);
    }

    #[test]
    fn test_concurrent_sessions_exact() {
        let hook = active_hook(100);
        let sessions = 8;
        let per_session = 500u64;

        std::thread::scope(|s| {
            for i in 0..sessions {
                let hook = hook.clone();
                s.spawn(move || {
                    let sql = format!("SELECT /* WORKLOAD_NAME=w{} */ 1", i % 2);
                    for _ in 0..per_session {
                        hook.statement_completed(&sql, StatementMetrics::read(2, 1));
                    }
                });
            }
        });

        for w in ["w0", "w1"] {
            let r = row(&hook, w);
            assert_eq!(r.n_queries, 4 * per_session);
            assert_eq!(r.rows_examined, 8 * per_session);
            assert_eq!(r.rows_sent, 4 * per_session);
        }
    }
}
