//! Per-workload SQL statement instrumentation.
//!
//! Statements tagged with `/* WORKLOAD_NAME=<name> */` are counted per
//! workload in a bounded concurrent table: statement count plus sums of
//! rows examined, sent and affected, and elapsed microseconds. The
//! aggregates are exposed as the read-only `workload_instrumentation` view.

pub mod config;
pub mod counters;
pub mod hook;
pub mod host;
pub mod lifecycle;
pub mod replay;
#[cfg(feature = "serve")]
pub mod serve;
pub mod table;
pub mod tag;
pub mod view;

pub use counters::{StatementMetrics, WorkloadCounters};
pub use hook::{QueryEvent, QueryEventKind, StatementHook};
pub use lifecycle::{Engine, LifecycleError};
pub use table::{CounterTable, WorkloadKey, OVERFLOW_WORKLOAD, UNSPECIFIED_WORKLOAD};
pub use view::{ViewRow, WorkloadView};
