use thiserror::Error;

use tasksync_core::CoreError;
use tasksync_core::ids::TaskId;
use tasksync_storage::{RemoteError, StorageError};

use crate::retry::{GaveUp, GiveUpReason};
use crate::versioned::WriteError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The record changed elsewhere. The cache has already been reloaded
    /// with the authoritative copy; the caller should refresh its view.
    #[error("task {task_id} was changed elsewhere; refresh and try again")]
    Conflict { task_id: TaskId, attempts: u32 },

    /// Transient faults outlasted the retry budget.
    #[error("{op} failed after {attempts} attempt(s): {message}")]
    RemoteUnavailable {
        op: &'static str,
        attempts: u32,
        message: String,
    },

    /// Validation, permission, or not-found rejection: surfaced verbatim,
    /// never retried.
    #[error("{op} rejected: {message}")]
    Rejected { op: &'static str, message: String },

    #[error("no authenticated session")]
    NoSession,

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("local store error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub(crate) fn remote_gave_up(
        op: &'static str,
        attempts: u32,
        reason: GiveUpReason,
        source: RemoteError,
    ) -> Self {
        match reason {
            GiveUpReason::Exhausted => SyncError::RemoteUnavailable {
                op,
                attempts,
                message: source.to_string(),
            },
            GiveUpReason::NonRetryable => SyncError::Rejected {
                op,
                message: source.to_string(),
            },
        }
    }

    pub(crate) fn from_remote_failure(failure: GaveUp<RemoteError>) -> Self {
        Self::remote_gave_up(failure.op, failure.attempts, failure.reason, failure.source)
    }

    pub(crate) fn from_write_failure(failure: GaveUp<WriteError>, task_id: TaskId) -> Self {
        match failure.source {
            WriteError::Conflict { .. } => SyncError::Conflict {
                task_id,
                attempts: failure.attempts,
            },
            WriteError::Remote(remote) => {
                Self::remote_gave_up(failure.op, failure.attempts, failure.reason, remote)
            }
        }
    }
}
