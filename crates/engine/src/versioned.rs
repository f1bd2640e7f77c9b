//! Optimistically-locked writes over one remote table.
//!
//! Every write is predicated on the record's version being unchanged since it
//! was last read; the remote store evaluates the id+version check and the
//! update atomically. A predicate miss ("zero rows affected") becomes
//! [`WriteError::Conflict`], a failure class of its own that the retry layer
//! refuses to replay.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use tasksync_core::Version;
use tasksync_core::wire::{FieldUpdates, RowFilter, WireRow};
use tasksync_storage::{FaultClass, RemoteError, RemoteTable};

#[derive(Debug, Error)]
pub enum WriteError {
    /// The conditional write matched zero rows: the version advanced under us
    /// or the record vanished. A logical conflict, not a fault.
    #[error("record {record_id} changed remotely (expected version {expected})")]
    Conflict { record_id: Uuid, expected: Version },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl FaultClass for WriteError {
    fn is_transient(&self) -> bool {
        match self {
            WriteError::Conflict { .. } => false,
            WriteError::Remote(error) => error.is_transient(),
        }
    }
}

/// One remote table with versioned write semantics. The store handle is
/// injected so callers own the wiring and tests substitute a fake.
#[derive(Clone)]
pub struct VersionedTable {
    remote: Arc<dyn RemoteTable>,
    table: &'static str,
}

impl VersionedTable {
    pub fn new(remote: Arc<dyn RemoteTable>, table: &'static str) -> Self {
        Self { remote, table }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<WireRow>, RemoteError> {
        let rows = self.remote.select(self.table, RowFilter::ById(id)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_owned(&self, owner: Uuid) -> Result<Vec<WireRow>, RemoteError> {
        self.remote.select(self.table, RowFilter::ByOwner(owner)).await
    }

    pub async fn insert(&self, row: WireRow) -> Result<WireRow, RemoteError> {
        self.remote.insert(self.table, row).await
    }

    /// Conditional update: succeeds only if the stored version still equals
    /// `expected`, in which case the store applies `set`, advances the
    /// version by one, and returns the new row.
    pub async fn conditional_update(
        &self,
        id: Uuid,
        expected: Version,
        set: FieldUpdates,
    ) -> Result<WireRow, WriteError> {
        match self
            .remote
            .update_where_version(self.table, id, expected, set)
            .await?
        {
            Some(row) => Ok(row),
            None => Err(WriteError::Conflict {
                record_id: id,
                expected,
            }),
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RemoteError> {
        self.remote.delete(self.table, id).await
    }
}
