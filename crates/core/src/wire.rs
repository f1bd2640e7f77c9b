//! Wire-level row format for the remote tabular store, and the single
//! translation layer between wire rows and typed task records.
//!
//! The remote SDK deals in loosely-typed rows; everything past this module
//! deals in [`SyncedTask`]. Translation is validated once, here, at the
//! boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::{TaskId, UserId};
use crate::task::{SyncedTask, Task, TaskPatch};
use crate::version::Version;

pub const TASKS_TABLE: &str = "tasks";

pub mod columns {
    pub const TITLE: &str = "title";
    pub const NOTES: &str = "notes";
    pub const COMPLETED: &str = "completed";
    pub const POMODOROS: &str = "pomodoros";
    pub const POSITION: &str = "position";
    pub const TAGS: &str = "tags";
    pub const DUE_AT: &str = "due_at";
}

/// Column-name-to-value map sent with conditional updates.
pub type FieldUpdates = BTreeMap<String, FieldValue>;

/// One row as the remote store returns it: identity and version envelope
/// plus the dynamically-typed domain columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRow {
    pub id: Uuid,
    pub owner: Uuid,
    pub version: Version,
    pub updated_at: i64,
    pub fields: FieldUpdates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    ById(Uuid),
    ByOwner(Uuid),
}

/// Translates a wire row into a typed task record.
///
/// Unknown columns are ignored so newer schema revisions on the remote side
/// do not break older clients; a missing or ill-typed required column is an
/// error.
pub fn task_from_row(row: &WireRow) -> Result<SyncedTask, CoreError> {
    let mut task = Task {
        task_id: TaskId::from_uuid(row.id),
        title: String::new(),
        notes: None,
        completed: false,
        pomodoros: 0,
        position: 0,
        tags: Vec::new(),
        due_at: None,
        updated_at: row.updated_at,
    };
    let mut saw_title = false;

    for (column, value) in &row.fields {
        match column.as_str() {
            columns::TITLE => {
                task.title = expect_text(column, value)?.to_string();
                saw_title = true;
            }
            columns::NOTES => {
                task.notes = match value {
                    FieldValue::Null => None,
                    other => Some(expect_text(column, other)?.to_string()),
                };
            }
            columns::COMPLETED => {
                task.completed = value.as_boolean().ok_or_else(|| type_error(column, "boolean"))?;
            }
            columns::POMODOROS => {
                task.pomodoros = expect_count(column, value)?;
            }
            columns::POSITION => {
                task.position = expect_count(column, value)?;
            }
            columns::TAGS => {
                task.tags = value
                    .as_text_array()
                    .ok_or_else(|| type_error(column, "text array"))?
                    .to_vec();
            }
            columns::DUE_AT => {
                task.due_at = match value {
                    FieldValue::Null => None,
                    FieldValue::Timestamp(t) => Some(*t),
                    _ => return Err(type_error(column, "timestamp")),
                };
            }
            _ => {}
        }
    }

    if !saw_title {
        return Err(CoreError::InvalidData(format!(
            "row {} is missing the title column",
            row.id
        )));
    }

    Ok(SyncedTask {
        task,
        owner: UserId::from_uuid(row.owner),
        version: row.version,
    })
}

/// Inverse of [`task_from_row`]; used when inserting and when seeding fakes.
pub fn task_to_row(synced: &SyncedTask) -> WireRow {
    let task = &synced.task;
    let mut fields = FieldUpdates::new();
    fields.insert(columns::TITLE.into(), FieldValue::Text(task.title.clone()));
    fields.insert(
        columns::NOTES.into(),
        match &task.notes {
            Some(notes) => FieldValue::Text(notes.clone()),
            None => FieldValue::Null,
        },
    );
    fields.insert(columns::COMPLETED.into(), FieldValue::Boolean(task.completed));
    fields.insert(
        columns::POMODOROS.into(),
        FieldValue::Integer(i64::from(task.pomodoros)),
    );
    fields.insert(
        columns::POSITION.into(),
        FieldValue::Integer(i64::from(task.position)),
    );
    fields.insert(columns::TAGS.into(), FieldValue::TextArray(task.tags.clone()));
    fields.insert(
        columns::DUE_AT.into(),
        match task.due_at {
            Some(t) => FieldValue::Timestamp(t),
            None => FieldValue::Null,
        },
    );

    WireRow {
        id: *task.task_id.as_uuid(),
        owner: *synced.owner.as_uuid(),
        version: synced.version,
        updated_at: task.updated_at,
        fields,
    }
}

impl TaskPatch {
    /// The wire field map carrying exactly the columns this patch names.
    /// Columns outside the patch are never sent, so a conditional update
    /// leaves them as the remote store has them.
    pub fn to_updates(&self) -> FieldUpdates {
        let mut updates = FieldUpdates::new();
        if let Some(title) = &self.title {
            updates.insert(columns::TITLE.into(), FieldValue::Text(title.clone()));
        }
        if let Some(notes) = &self.notes {
            updates.insert(
                columns::NOTES.into(),
                match notes {
                    Some(text) => FieldValue::Text(text.clone()),
                    None => FieldValue::Null,
                },
            );
        }
        if let Some(completed) = self.completed {
            updates.insert(columns::COMPLETED.into(), FieldValue::Boolean(completed));
        }
        if let Some(pomodoros) = self.pomodoros {
            updates.insert(
                columns::POMODOROS.into(),
                FieldValue::Integer(i64::from(pomodoros)),
            );
        }
        if let Some(position) = self.position {
            updates.insert(
                columns::POSITION.into(),
                FieldValue::Integer(i64::from(position)),
            );
        }
        if let Some(tags) = &self.tags {
            updates.insert(columns::TAGS.into(), FieldValue::TextArray(tags.clone()));
        }
        if let Some(due_at) = self.due_at {
            updates.insert(
                columns::DUE_AT.into(),
                match due_at {
                    Some(t) => FieldValue::Timestamp(t),
                    None => FieldValue::Null,
                },
            );
        }
        updates
    }
}

fn expect_text<'a>(column: &str, value: &'a FieldValue) -> Result<&'a str, CoreError> {
    value.as_text().ok_or_else(|| type_error(column, "text"))
}

fn expect_count(column: &str, value: &FieldValue) -> Result<u32, CoreError> {
    let n = value.as_integer().ok_or_else(|| type_error(column, "integer"))?;
    u32::try_from(n).map_err(|_| {
        CoreError::InvalidData(format!("column {column}: negative or oversized count {n}"))
    })
}

fn type_error(column: &str, expected: &str) -> CoreError {
    CoreError::InvalidData(format!("column {column}: expected {expected}"))
}
