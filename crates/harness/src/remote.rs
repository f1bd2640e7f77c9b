use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use tasksync_core::Version;
use tasksync_core::clock;
use tasksync_core::wire::{FieldUpdates, RowFilter, WireRow};
use tasksync_storage::{RemoteError, RemoteTable};

/// In-memory stand-in for the hosted tabular store.
///
/// The id+version check-and-set is atomic under the table lock, matching the
/// contract the real store guarantees. Scripted faults are consumed one per
/// call, before the tables are touched, so an injected failure never leaves a
/// half-applied write behind.
pub struct InMemoryRemote {
    tables: Mutex<BTreeMap<String, BTreeMap<Uuid, WireRow>>>,
    faults: StdMutex<VecDeque<RemoteError>>,
    conflict_everything: AtomicBool,
    pub select_calls: AtomicU64,
    pub insert_calls: AtomicU64,
    pub update_calls: AtomicU64,
    pub delete_calls: AtomicU64,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            faults: StdMutex::new(VecDeque::new()),
            conflict_everything: AtomicBool::new(false),
            select_calls: AtomicU64::new(0),
            insert_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
        }
    }

    /// Queue an error for the next call, whatever it is.
    pub fn fail_next(&self, error: RemoteError) {
        self.faults.lock().unwrap().push_back(error);
    }

    /// Queue the same error for the next `n` calls.
    pub fn fail_next_n(&self, n: usize, error: RemoteError) {
        let mut faults = self.faults.lock().unwrap();
        for _ in 0..n {
            faults.push_back(error.clone());
        }
    }

    /// When set, every conditional update reports zero rows matched,
    /// simulating a record under constant contention.
    pub fn force_conflicts(&self, on: bool) {
        self.conflict_everything.store(on, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> u64 {
        self.select_calls.load(Ordering::SeqCst)
            + self.insert_calls.load(Ordering::SeqCst)
            + self.update_calls.load(Ordering::SeqCst)
            + self.delete_calls.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, table: &str, row: WireRow) {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(row.id, row);
    }

    pub async fn row(&self, table: &str, id: Uuid) -> Option<WireRow> {
        self.tables
            .lock()
            .await
            .get(table)
            .and_then(|rows| rows.get(&id))
            .cloned()
    }

    /// Simulates an edit from another device: applies `set` and advances the
    /// version unconditionally, bypassing the optimistic check.
    pub async fn bump_version(
        &self,
        table: &str,
        id: Uuid,
        set: FieldUpdates,
    ) -> Result<WireRow, RemoteError> {
        let now = now_ms()?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| RemoteError::Service(format!("record not found: {id}")))?;
        for (column, value) in set {
            row.fields.insert(column, value);
        }
        row.version = row.version.next();
        row.updated_at = now;
        Ok(row.clone())
    }

    fn take_fault(&self) -> Option<RemoteError> {
        self.faults.lock().unwrap().pop_front()
    }
}

fn now_ms() -> Result<i64, RemoteError> {
    clock::now_ms().map_err(|e| RemoteError::Service(e.to_string()))
}

#[async_trait]
impl RemoteTable for InMemoryRemote {
    async fn select(&self, table: &str, filter: RowFilter) -> Result<Vec<WireRow>, RemoteError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let tables = self.tables.lock().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(match filter {
            RowFilter::ById(id) => rows.get(&id).cloned().into_iter().collect(),
            RowFilter::ByOwner(owner) => {
                rows.values().filter(|r| r.owner == owner).cloned().collect()
            }
        })
    }

    async fn insert(&self, table: &str, row: WireRow) -> Result<WireRow, RemoteError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let now = now_ms()?;
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&row.id) {
            return Err(RemoteError::Status {
                code: 422,
                message: format!("duplicate row id {}", row.id),
            });
        }
        let mut stored = row;
        stored.version = Version::INITIAL;
        stored.updated_at = now;
        rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_where_version(
        &self,
        table: &str,
        id: Uuid,
        expected_version: Version,
        set: FieldUpdates,
    ) -> Result<Option<WireRow>, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        let now = now_ms()?;
        let mut tables = self.tables.lock().await;
        let row = tables.get_mut(table).and_then(|rows| rows.get_mut(&id));
        match row {
            Some(row)
                if !self.conflict_everything.load(Ordering::SeqCst)
                    && row.version == expected_version =>
            {
                for (column, value) in set {
                    row.fields.insert(column, value);
                }
                row.version = expected_version.next();
                row.updated_at = now;
                Ok(Some(row.clone()))
            }
            // Id miss or version miss: the caller only learns "zero rows".
            _ => Ok(None),
        }
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<(), RemoteError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        if let Some(rows) = self.tables.lock().await.get_mut(table) {
            rows.remove(&id);
        }
        Ok(())
    }
}
