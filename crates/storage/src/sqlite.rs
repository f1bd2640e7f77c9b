use rusqlite::{Connection, OptionalExtension, params};

use tasksync_core::clock;
use tasksync_core::ids::TaskId;
use tasksync_core::task::{Task, TaskPatch};

use crate::error::StorageError;

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// The identity-less fallback store: plain task rows, no owner, no version,
/// no network. Used exclusively when no authenticated session exists.
pub struct LocalTaskStore {
    conn: Connection,
}

impl LocalTaskStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// All tasks in manual sort order.
    pub fn list(&self) -> Result<Vec<Task>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, title, notes, completed, pomodoros, position, tags, due_at, updated_at
             FROM tasks ORDER BY position, task_id",
        )?;
        let rows = stmt.query_map([], read_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub fn get(&self, task_id: TaskId) -> Result<Option<Task>, StorageError> {
        self.conn
            .query_row(
                "SELECT task_id, title, notes, completed, pomodoros, position, tags, due_at, updated_at
                 FROM tasks WHERE task_id = ?1",
                params![task_id.as_bytes()],
                read_task,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Position for a task appended at the end of the list.
    pub fn next_position(&self) -> Result<u32, StorageError> {
        let next: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM tasks",
            [],
            |row| row.get(0),
        )?;
        Ok(next as u32)
    }

    pub fn insert(&mut self, task: &Task) -> Result<(), StorageError> {
        let tags = encode_tags(&task.tags)?;
        self.conn.execute(
            "INSERT INTO tasks (task_id, title, notes, completed, pomodoros, position, tags, due_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.task_id.as_bytes(),
                task.title,
                task.notes,
                task.completed,
                task.pomodoros,
                task.position,
                tags,
                task.due_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Read-modify-write of a single row; stamps `updated_at`.
    pub fn apply_patch(&mut self, task_id: TaskId, patch: &TaskPatch) -> Result<Task, StorageError> {
        let mut task = self
            .get(task_id)?
            .ok_or_else(|| StorageError::NotFound(task_id.to_string()))?;
        patch.apply(&mut task);
        task.updated_at = clock::now_ms()?;

        let tags = encode_tags(&task.tags)?;
        self.conn.execute(
            "UPDATE tasks SET title = ?2, notes = ?3, completed = ?4, pomodoros = ?5,
                              position = ?6, tags = ?7, due_at = ?8, updated_at = ?9
             WHERE task_id = ?1",
            params![
                task.task_id.as_bytes(),
                task.title,
                task.notes,
                task.completed,
                task.pomodoros,
                task.position,
                tags,
                task.due_at,
                task.updated_at,
            ],
        )?;
        Ok(task)
    }

    /// Returns whether a row was actually removed.
    pub fn delete(&mut self, task_id: TaskId) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM tasks WHERE task_id = ?1",
            params![task_id.as_bytes()],
        )?;
        Ok(affected > 0)
    }

    /// Rewrites positions to match the given order. Ids not present in the
    /// store are skipped; stored tasks missing from `order` keep their row
    /// but sort after the reordered ones.
    pub fn reorder(&mut self, order: &[TaskId]) -> Result<(), StorageError> {
        let now = clock::now_ms()?;
        let tx = self.conn.transaction()?;
        for (position, task_id) in order.iter().enumerate() {
            tx.execute(
                "UPDATE tasks SET position = ?2, updated_at = ?3 WHERE task_id = ?1",
                params![task_id.as_bytes(), position as u32, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn read_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let task_id_bytes: Vec<u8> = row.get(0)?;
    let tags_json: String = row.get(6)?;

    let task_id = to_array::<16>(task_id_bytes, "task_id").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Blob, e.to_string().into())
    })?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Task {
        task_id: TaskId::from_bytes(task_id),
        title: row.get(1)?,
        notes: row.get(2)?,
        completed: row.get(3)?,
        pomodoros: row.get(4)?,
        position: row.get(5)?,
        tags,
        due_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn encode_tags(tags: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(tags).map_err(|e| StorageError::Serialization(e.to_string()))
}
