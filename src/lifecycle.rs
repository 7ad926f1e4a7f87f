/// Engine lifecycle: activation allocates the counter table, deactivation
/// drops it.
///
/// Sessions and view readers clone the table's `Arc` out of the engine, so
/// a deactivation never frees a table someone is still reading; it only
/// stops new work from finding it.
use crate::config::EngineConfig;
use crate::counters::StatementMetrics;
use crate::hook::{self, QueryEvent, StatementHook};
use crate::table::{CounterTable, WorkloadKey};
use crate::tag::TagExtractor;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// The statement the host runs to load the engine. It completes after the
/// table exists, so it is the first statement counted.
pub const ACTIVATION_STATEMENT: &str =
    "INSTALL COMPONENT 'file://component_workload_instrumentation'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Inactive,
    Active,
}

/// Point-in-time description of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub activated_at: Option<DateTime<Utc>>,
    pub capacity: usize,
    pub entries: usize,
    pub dynamic_entries: usize,
    pub full: bool,
}

#[derive(Debug)]
struct Activation {
    table: Arc<CounterTable>,
    activated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    extractor: TagExtractor,
    active: RwLock<Option<Activation>>,
}

impl Engine {
    /// Create an inactive engine.
    pub fn new(config: EngineConfig) -> Self {
        let extractor = TagExtractor::new(config.max_workload_len);
        Self {
            config,
            extractor,
            active: RwLock::new(None),
        }
    }

    /// Allocate a fresh table and count the activation statement.
    pub fn activate(&self) -> Result<(), LifecycleError> {
        let started = Instant::now();
        info!("initializing workload instrumentation");

        {
            let mut active = self.active.write();
            if active.is_some() {
                return Err(LifecycleError::AlreadyActive);
            }
            *active = Some(Activation {
                table: Arc::new(CounterTable::new(self.config.capacity)),
                activated_at: Utc::now(),
            });
        }

        let metrics = StatementMetrics::default().with_duration(started.elapsed());
        self.on_query_event(&QueryEvent::completed(ACTIVATION_STATEMENT, metrics));

        info!(capacity = self.config.capacity, "workload instrumentation initialized");
        Ok(())
    }

    /// Drop the table. All counters are lost.
    pub fn deactivate(&self) -> Result<(), LifecycleError> {
        let previous = self.active.write().take();
        match previous {
            Some(activation) => {
                info!(
                    entries = activation.table.len(),
                    "workload instrumentation deinitialized"
                );
                Ok(())
            }
            None => Err(LifecycleError::NotActive),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    /// The live table, if active.
    pub fn table(&self) -> Option<Arc<CounterTable>> {
        self.active.read().as_ref().map(|a| a.table.clone())
    }

    pub fn extractor(&self) -> &TagExtractor {
        &self.extractor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Route one query event into the live table through the hook's
    /// failure boundary.
    pub fn on_query_event(&self, event: &QueryEvent<'_>) -> Option<WorkloadKey> {
        let table = self.table();
        hook::dispatch(table.as_deref(), &self.extractor, event)
    }

    /// A hook handle for an executor session.
    pub fn hook(self: &Arc<Self>) -> StatementHook {
        StatementHook::new(self.clone())
    }

    pub fn status(&self) -> EngineStatus {
        let active = self.active.read();
        match active.as_ref() {
            Some(a) => EngineStatus {
                state: EngineState::Active,
                activated_at: Some(a.activated_at),
                capacity: a.table.capacity(),
                entries: a.table.len(),
                dynamic_entries: a.table.dynamic_len(),
                full: a.table.is_full(),
            },
            None => EngineStatus {
                state: EngineState::Inactive,
                activated_at: None,
                capacity: self.config.capacity,
                entries: 0,
                dynamic_entries: 0,
                full: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    AlreadyActive,
    NotActive,
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::AlreadyActive => {
                write!(f, "workload instrumentation is already active")
            }
            LifecycleError::NotActive => write!(f, "workload instrumentation is not active"),
        }
    }
}

impl std::error::Error for LifecycleError {}
