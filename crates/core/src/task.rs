use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{TaskId, UserId};
use crate::version::Version;

pub const MAX_TITLE_LEN: usize = 500;

/// Domain fields of a task, shared by the remote-synced and local-only paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub notes: Option<String>,
    pub completed: bool,
    /// Completed focus sessions recorded against this task.
    pub pomodoros: u32,
    /// Manual sort order within the owner's list.
    pub position: u32,
    pub tags: Vec<String>,
    /// Due date as milliseconds since Unix epoch.
    pub due_at: Option<i64>,
    pub updated_at: i64,
}

/// A task as last seen on the remote store, with its ownership and version
/// envelope. Cache entries are `SyncedTask`s; the version is what conditional
/// updates are predicated on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedTask {
    pub task: Task,
    pub owner: UserId,
    pub version: Version,
}

/// Input for creating a task. Position and timestamps are assigned by the
/// data layer, not the caller.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub due_at: Option<i64>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_title(&self.title)
    }

    pub fn into_task(self, task_id: TaskId, position: u32, now_ms: i64) -> Task {
        Task {
            task_id,
            title: self.title,
            notes: self.notes,
            completed: false,
            pomodoros: 0,
            position,
            tags: self.tags,
            due_at: self.due_at,
            updated_at: now_ms,
        }
    }
}

/// A partial field update. `None` leaves a field untouched; for clearable
/// fields the inner option distinguishes "set" from "clear".
///
/// A patch is a single-use mutation intent: built per user action, consumed
/// once by the update pipeline, and discarded afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub completed: Option<bool>,
    pub pomodoros: Option<u32>,
    pub position: Option<u32>,
    pub tags: Option<Vec<String>>,
    pub due_at: Option<Option<i64>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }

    /// Applies the patched fields to a task in place. Timestamps are stamped
    /// by whichever store accepts the write, not here.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(notes) = &self.notes {
            task.notes = notes.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(pomodoros) = self.pomodoros {
            task.pomodoros = pomodoros;
        }
        if let Some(position) = self.position {
            task.position = position;
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if let Some(due_at) = self.due_at {
            task.due_at = due_at;
        }
    }
}

fn validate_title(title: &str) -> Result<(), CoreError> {
    if title.trim().is_empty() {
        return Err(CoreError::InvalidData("task title must not be empty".into()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(CoreError::InvalidData(format!(
            "task title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        TaskDraft::new("write report").into_task(TaskId::new(), 0, 1_000)
    }

    #[test]
    fn draft_rejects_blank_title() {
        assert!(TaskDraft::new("   ").validate().is_err());
        assert!(TaskDraft::new("ok").validate().is_ok());
    }

    #[test]
    fn draft_rejects_oversized_title() {
        let draft = TaskDraft::new("x".repeat(MAX_TITLE_LEN + 1));
        assert!(draft.validate().is_err());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(TaskPatch::default().is_empty());
        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn patch_applies_only_named_fields() {
        let mut task = sample_task();
        let patch = TaskPatch {
            title: Some("revised".into()),
            due_at: Some(Some(99)),
            ..Default::default()
        };
        patch.apply(&mut task);
        assert_eq!(task.title, "revised");
        assert_eq!(task.due_at, Some(99));
        assert!(!task.completed);
        assert_eq!(task.pomodoros, 0);
    }

    #[test]
    fn patch_clears_optional_fields() {
        let mut task = sample_task();
        task.notes = Some("scratch".into());
        task.due_at = Some(42);
        let patch = TaskPatch {
            notes: Some(None),
            due_at: Some(None),
            ..Default::default()
        };
        patch.apply(&mut task);
        assert_eq!(task.notes, None);
        assert_eq!(task.due_at, None);
    }
}
