/// Bounded, concurrent workload counter table.
///
/// Holds two reserved entries plus up to `capacity` dynamic ones. Lookups
/// of known names take the index lock for reading; only admitting a new
/// name takes it for writing. Each entry carries its own mutex, so
/// statements for different workloads never contend on counters.
use crate::counters::{StatementMetrics, Totals, WorkloadCounters};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Statements that carry no workload tag.
pub const UNSPECIFIED_WORKLOAD: &str = "__UNSPECIFIED__";
/// Tagged statements whose workload could not get a slot.
pub const OVERFLOW_WORKLOAD: &str = "__OVERFLOW__";
/// Default number of dynamic entries.
pub const DEFAULT_CAPACITY: usize = 5000;

const RESERVED_WORKLOADS: [&str; 2] = [UNSPECIFIED_WORKLOAD, OVERFLOW_WORKLOAD];

#[derive(Debug)]
struct Entry {
    workload: Arc<str>,
    totals: Mutex<Totals>,
}

impl Entry {
    fn new(workload: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            workload,
            totals: Mutex::new(Totals::default()),
        })
    }

    fn read(&self) -> WorkloadCounters {
        let totals = *self.totals.lock();
        WorkloadCounters::from_totals(&self.workload, totals)
    }
}

/// Handle to one entry of a [`CounterTable`], returned by
/// [`CounterTable::resolve_or_route`].
#[derive(Debug, Clone)]
pub struct WorkloadKey(Arc<Entry>);

impl WorkloadKey {
    pub fn name(&self) -> &str {
        &self.0.workload
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_WORKLOADS.contains(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Applying the statement would overflow one of the entry's sums.
    CounterOverflow { workload: String },
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::CounterOverflow { workload } => {
                write!(f, "counter overflow for workload '{workload}'")
            }
        }
    }
}

impl std::error::Error for TableError {}

#[derive(Debug, Default)]
struct Index {
    by_name: HashMap<Arc<str>, Arc<Entry>>,
    /// Creation order: reserved entries first, then admissions.
    ordered: Vec<Arc<Entry>>,
}

impl Index {
    fn insert(&mut self, entry: Arc<Entry>) {
        self.by_name.insert(entry.workload.clone(), entry.clone());
        self.ordered.push(entry);
    }
}

#[derive(Debug)]
pub struct CounterTable {
    capacity: usize,
    index: RwLock<Index>,
    /// Number of admitted dynamic entries. Only written under the index
    /// write lock, so it agrees with the index whenever the lock is held.
    dynamic: AtomicUsize,
    unspecified: Arc<Entry>,
    overflow: Arc<Entry>,
}

impl CounterTable {
    /// Create a table with the reserved entries and room for `capacity`
    /// dynamic ones.
    pub fn new(capacity: usize) -> Self {
        let unspecified = Entry::new(Arc::from(UNSPECIFIED_WORKLOAD));
        let overflow = Entry::new(Arc::from(OVERFLOW_WORKLOAD));

        let mut index = Index {
            by_name: HashMap::with_capacity(capacity.min(DEFAULT_CAPACITY) + 2),
            ordered: Vec::with_capacity(capacity.min(DEFAULT_CAPACITY) + 2),
        };
        index.insert(unspecified.clone());
        index.insert(overflow.clone());

        Self {
            capacity,
            index: RwLock::new(index),
            dynamic: AtomicUsize::new(0),
            unspecified,
            overflow,
        }
    }

    /// Map an optional workload name to the entry its statement counts under.
    ///
    /// `None` goes to `__UNSPECIFIED__`. A known name (reserved or dynamic)
    /// maps to itself. An unknown name is admitted while fewer than
    /// `capacity` dynamic entries exist, otherwise it goes to
    /// `__OVERFLOW__` and is never admitted afterwards, since entries are
    /// never freed. Admission of the last slot happens under the index
    /// write lock, so racing callers agree on a single winner.
    pub fn resolve_or_route(&self, name: Option<&str>) -> WorkloadKey {
        let Some(name) = name else {
            return WorkloadKey(self.unspecified.clone());
        };

        {
            let index = self.index.read();
            if let Some(entry) = index.by_name.get(name) {
                return WorkloadKey(entry.clone());
            }
            if self.dynamic.load(Ordering::Acquire) >= self.capacity {
                return WorkloadKey(self.overflow.clone());
            }
        }

        let mut index = self.index.write();
        // Another session may have admitted the same name, or taken the
        // last slot, between the two lock acquisitions.
        if let Some(entry) = index.by_name.get(name) {
            return WorkloadKey(entry.clone());
        }
        let admitted = self.dynamic.load(Ordering::Acquire);
        if admitted >= self.capacity {
            return WorkloadKey(self.overflow.clone());
        }

        let entry = Entry::new(Arc::from(name));
        index.insert(entry.clone());
        self.dynamic.store(admitted + 1, Ordering::Release);
        drop(index);

        debug!(workload = name, dynamic = admitted + 1, "admitted workload");
        if admitted + 1 == self.capacity {
            warn!(
                capacity = self.capacity,
                "workload table full, new workloads will be counted under {}",
                OVERFLOW_WORKLOAD
            );
        }
        WorkloadKey(entry)
    }

    /// Add one statement's metrics to `key`.
    ///
    /// `key` must come from this table's `resolve_or_route`. All five
    /// fields change under the entry's lock; on overflow nothing changes.
    pub fn increment(
        &self,
        key: &WorkloadKey,
        metrics: &StatementMetrics,
    ) -> Result<(), TableError> {
        let mut totals = key.0.totals.lock();
        totals
            .checked_apply(metrics)
            .ok_or_else(|| TableError::CounterOverflow {
                workload: key.name().to_string(),
            })
    }

    /// Resolve `name` and count one statement under the resulting key.
    pub fn record(
        &self,
        name: Option<&str>,
        metrics: &StatementMetrics,
    ) -> Result<WorkloadKey, TableError> {
        let key = self.resolve_or_route(name);
        self.increment(&key, metrics)?;
        Ok(key)
    }

    /// Read every entry in creation order.
    ///
    /// The index lock is held only while the entry handles are copied.
    /// Each row is read under its own entry lock, so rows are never torn,
    /// though different rows may reflect different instants.
    pub fn snapshot(&self) -> Vec<WorkloadCounters> {
        let entries = self.index.read().ordered.clone();
        entries.iter().map(|e| e.read()).collect()
    }

    /// Read a single entry by name.
    pub fn get(&self, workload: &str) -> Option<WorkloadCounters> {
        let entry = self.index.read().by_name.get(workload).cloned();
        entry.map(|e| e.read())
    }

    /// Total entries including the reserved ones.
    pub fn len(&self) -> usize {
        self.dynamic_len() + RESERVED_WORKLOADS.len()
    }

    /// Always false: the reserved entries exist from construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn dynamic_len(&self) -> usize {
        self.dynamic.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.dynamic_len() >= self.capacity
    }
}
