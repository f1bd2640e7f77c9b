use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use tasksync_core::Version;
use tasksync_core::wire::{FieldUpdates, RowFilter, WireRow};

/// Failure classes reported by the remote store SDK. `Status` carries an
/// HTTP-style code from the hosted service; `Service` is the untyped
/// catch-all for SDK failures that arrive as bare messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("too many requests")]
    RateLimited,

    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("service error: {0}")]
    Service(String),
}

/// Splits failures into transient faults, which are worth retrying
/// unchanged, and permanent ones, which no amount of retrying can fix.
pub trait FaultClass {
    fn is_transient(&self) -> bool;
}

/// Status codes that never resolve by retrying: bad request, auth failures,
/// missing records, validation rejections.
const PERMANENT_STATUS: [u16; 5] = [400, 401, 403, 404, 422];

/// Message markers for loosely-typed SDK failures of the same classes.
const PERMANENT_MARKERS: [&str; 4] = ["validation", "invalid", "not found", "unauthorized"];

fn message_is_permanent(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl FaultClass for RemoteError {
    fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::RateLimited => true,
            RemoteError::Status { code, message } => {
                !PERMANENT_STATUS.contains(code) && !message_is_permanent(message)
            }
            RemoteError::Service(message) => !message_is_permanent(message),
        }
    }
}

/// The remote tabular store boundary. Implementations are injected (never a
/// module-level singleton) so tests can substitute a fake.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Rows matching the filter, in no particular order.
    async fn select(&self, table: &str, filter: RowFilter) -> Result<Vec<WireRow>, RemoteError>;

    /// Stores a new row. The store assigns the initial version and stamps
    /// `updated_at`, echoing the stored row back.
    async fn insert(&self, table: &str, row: WireRow) -> Result<WireRow, RemoteError>;

    /// Conditional write: applies `set` only to the row whose id AND stored
    /// version both match, atomically. Returns the updated row (version
    /// advanced by one, `updated_at` stamped), or `None` when zero rows
    /// matched, which is the optimistic-locking rejection signal.
    async fn update_where_version(
        &self,
        table: &str,
        id: Uuid,
        expected_version: Version,
        set: FieldUpdates,
    ) -> Result<Option<WireRow>, RemoteError>;

    /// Unconditional delete; succeeds even when the row is already gone.
    async fn delete(&self, table: &str, id: Uuid) -> Result<(), RemoteError>;
}
