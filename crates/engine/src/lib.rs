pub mod error;
pub mod retry;
pub mod versioned;

pub use error::SyncError;
pub use retry::{GaveUp, GiveUpReason, JITTER_BAND, RetryHooks, RetryPolicy, run_with_retry};
pub use versioned::{VersionedTable, WriteError};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tasksync_core::Version;
use tasksync_core::clock;
use tasksync_core::ids::TaskId;
use tasksync_core::session::AuthSession;
use tasksync_core::task::{SyncedTask, Task, TaskDraft, TaskPatch};
use tasksync_core::wire::{FieldUpdates, TASKS_TABLE, task_from_row, task_to_row};
use tasksync_storage::{LocalTaskStore, RemoteTable};

/// The repository's two retry budgets: the inner transient-fault budget
/// applied to every remote call, and the outer conflict budget of `update`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    /// Conditional-update attempts `update` makes before a conflict becomes
    /// terminal. Every conflicting attempt is followed by exactly one
    /// authoritative re-fetch, so re-fetches are bounded by the same number.
    pub conflict_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            conflict_retries: 3,
        }
    }
}

/// Per-record outcome of a best-effort reorder.
#[derive(Debug, Default)]
pub struct ReorderReport {
    pub applied: Vec<TaskId>,
    pub failed: Vec<(TaskId, SyncError)>,
}

impl ReorderReport {
    pub fn fully_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Domain façade over the task table.
///
/// With an authenticated session, mutations flow through the retry runner and
/// the versioned table, and the repository keeps the last-known remote copy of
/// every task (with its version) as the only shared client-side state. Without
/// a session, everything routes to the local fallback store: no versioning, no
/// retries, no network.
pub struct TaskRepository {
    tasks: VersionedTable,
    local: LocalTaskStore,
    config: SyncConfig,
    session: Option<AuthSession>,
    cache: BTreeMap<TaskId, SyncedTask>,
}

impl TaskRepository {
    pub fn new(remote: Arc<dyn RemoteTable>, local: LocalTaskStore, config: SyncConfig) -> Self {
        Self {
            tasks: VersionedTable::new(remote, TASKS_TABLE),
            local,
            config,
            session: None,
            cache: BTreeMap::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Adopts a session and loads the remote state. Called on sign-in and on
    /// identity change.
    pub async fn sign_in(&mut self, session: AuthSession) -> Result<(), SyncError> {
        info!(user = %session.user_id(), "session established, loading remote tasks");
        self.session = Some(session);
        self.reload().await
    }

    /// Drops the session and the remote cache. Local-only data is untouched.
    pub fn sign_out(&mut self) {
        self.session = None;
        self.cache.clear();
    }

    /// Replaces the cache with the authoritative remote state.
    pub async fn reload(&mut self) -> Result<(), SyncError> {
        let owner = *self.require_session()?.user_id().as_uuid();
        let rows = run_with_retry(
            &self.config.retry,
            "tasks.load",
            RetryHooks::default(),
            || self.tasks.fetch_owned(owner),
        )
        .await
        .map_err(SyncError::from_remote_failure)?;

        let mut cache = BTreeMap::new();
        for row in &rows {
            let synced = task_from_row(row)?;
            cache.insert(synced.task.task_id, synced);
        }
        debug!(count = cache.len(), "remote tasks loaded");
        self.cache = cache;
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current view in manual sort order: cached remote copies when signed
    /// in, otherwise the local fallback.
    pub fn tasks(&self) -> Result<Vec<Task>, SyncError> {
        if self.session.is_some() {
            let mut tasks: Vec<Task> = self.cache.values().map(|s| s.task.clone()).collect();
            tasks.sort_by(|a, b| (a.position, a.task_id).cmp(&(b.position, b.task_id)));
            Ok(tasks)
        } else {
            Ok(self.local.list()?)
        }
    }

    /// The last-known remote copy, if any.
    pub fn cached(&self, task_id: TaskId) -> Option<&SyncedTask> {
        self.cache.get(&task_id)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Creates a task at the end of the list.
    pub async fn create(&mut self, draft: TaskDraft) -> Result<Task, SyncError> {
        draft.validate()?;

        let Some(session) = self.session.clone() else {
            let position = self.local.next_position()?;
            let task = draft.into_task(TaskId::new(), position, clock::now_ms()?);
            self.local.insert(&task)?;
            return Ok(task);
        };

        let position = self
            .cache
            .values()
            .map(|s| s.task.position + 1)
            .max()
            .unwrap_or(0);
        let task = draft.into_task(TaskId::new(), position, clock::now_ms()?);
        let row = task_to_row(&SyncedTask {
            task,
            owner: session.user_id(),
            version: Version::INITIAL,
        });

        let stored = run_with_retry(
            &self.config.retry,
            "task.create",
            RetryHooks::default(),
            || self.tasks.insert(row.clone()),
        )
        .await
        .map_err(SyncError::from_remote_failure)?;

        let synced = task_from_row(&stored)?;
        let created = synced.task.clone();
        debug!(task = %created.task_id, "task created");
        self.cache.insert(created.task_id, synced);
        Ok(created)
    }

    /// Applies a partial update with optimistic locking.
    ///
    /// Transient faults are retried inside each attempt. A version conflict
    /// triggers a logged re-fetch of the authoritative row followed by a
    /// reapplication of the same field delta, bounded at
    /// [`SyncConfig::conflict_retries`] attempts in total. The delta carries
    /// only the patched columns, so concurrent changes to other columns
    /// survive the reapplication. The final re-fetch doubles as the reload,
    /// leaving the cache consistent with the remote store even on failure.
    pub async fn update(&mut self, task_id: TaskId, patch: TaskPatch) -> Result<Task, SyncError> {
        patch.validate()?;
        if patch.is_empty() {
            // Nothing to write; skip the version bump.
            return self.peek(task_id);
        }
        if self.session.is_none() {
            return Ok(self.local.apply_patch(task_id, &patch)?);
        }

        let id = *task_id.as_uuid();
        let updates = patch.to_updates();
        let mut expected = self.known_version(task_id).await?;
        let mut attempt: u32 = 1;

        loop {
            let outcome = run_with_retry(
                &self.config.retry,
                "task.update",
                RetryHooks::default(),
                || self.tasks.conditional_update(id, expected, updates.clone()),
            )
            .await;

            match outcome {
                Ok(row) => {
                    let synced = task_from_row(&row)?;
                    let task = synced.task.clone();
                    self.cache.insert(task_id, synced);
                    return Ok(task);
                }
                Err(failure) => {
                    if !matches!(failure.source, WriteError::Conflict { .. }) {
                        return Err(SyncError::from_write_failure(failure, task_id));
                    }
                    warn!(task = %task_id, attempt, "edit conflict, re-fetching latest version");
                    let latest = self.refresh_record(task_id).await?;
                    if attempt >= self.config.conflict_retries {
                        return Err(SyncError::Conflict {
                            task_id,
                            attempts: attempt,
                        });
                    }
                    expected = latest.version;
                    attempt += 1;
                }
            }
        }
    }

    /// Flips completion with a single read-modify-write cycle. A conflict
    /// reloads the record and surfaces immediately; replaying a toggle
    /// against a newer version could undo someone else's flip.
    pub async fn toggle_completion(&mut self, task_id: TaskId) -> Result<Task, SyncError> {
        if self.session.is_none() {
            let current = self
                .local
                .get(task_id)?
                .ok_or(SyncError::UnknownTask(task_id))?;
            let patch = TaskPatch {
                completed: Some(!current.completed),
                ..Default::default()
            };
            return Ok(self.local.apply_patch(task_id, &patch)?);
        }

        let current = self.known_record(task_id).await?;
        let patch = TaskPatch {
            completed: Some(!current.task.completed),
            ..Default::default()
        };
        self.write_once("task.toggle", task_id, current.version, patch.to_updates())
            .await
    }

    /// Records one completed focus session against a task. Same single-cycle
    /// conflict contract as `toggle_completion`: double counting is worse
    /// than asking the user to retry.
    pub async fn record_pomodoro(&mut self, task_id: TaskId) -> Result<Task, SyncError> {
        if self.session.is_none() {
            let current = self
                .local
                .get(task_id)?
                .ok_or(SyncError::UnknownTask(task_id))?;
            let patch = TaskPatch {
                pomodoros: Some(current.pomodoros + 1),
                ..Default::default()
            };
            return Ok(self.local.apply_patch(task_id, &patch)?);
        }

        let current = self.known_record(task_id).await?;
        let patch = TaskPatch {
            pomodoros: Some(current.task.pomodoros + 1),
            ..Default::default()
        };
        self.write_once("task.pomodoro", task_id, current.version, patch.to_updates())
            .await
    }

    /// Unconditional remote delete. The cached copy is dropped only after
    /// the remote accepts; a failed delete must not hide data that still
    /// exists.
    pub async fn delete(&mut self, task_id: TaskId) -> Result<(), SyncError> {
        if self.session.is_none() {
            if !self.local.delete(task_id)? {
                return Err(SyncError::UnknownTask(task_id));
            }
            return Ok(());
        }

        let id = *task_id.as_uuid();
        run_with_retry(
            &self.config.retry,
            "task.delete",
            RetryHooks::default(),
            || self.tasks.delete(id),
        )
        .await
        .map_err(SyncError::from_remote_failure)?;

        self.cache.remove(&task_id);
        Ok(())
    }

    /// Reassigns positions to match `order`. Each changed position is an
    /// independent conditional update with its own retry state; there is no
    /// cross-record transaction, so partial failure leaves some tasks moved
    /// and others not. The report names both groups.
    pub async fn reorder(&mut self, order: &[TaskId]) -> Result<ReorderReport, SyncError> {
        if self.session.is_none() {
            self.local.reorder(order)?;
            return Ok(ReorderReport {
                applied: order.to_vec(),
                failed: Vec::new(),
            });
        }

        // Phase one: compute position deltas from known state.
        let mut pending: Vec<(TaskId, Uuid, Version, FieldUpdates)> = Vec::new();
        let mut failed: Vec<(TaskId, SyncError)> = Vec::new();
        for (index, task_id) in order.iter().enumerate() {
            let position = index as u32;
            match self.cache.get(task_id) {
                None => failed.push((*task_id, SyncError::UnknownTask(*task_id))),
                Some(entry) if entry.task.position == position => {}
                Some(entry) => {
                    let patch = TaskPatch {
                        position: Some(position),
                        ..Default::default()
                    };
                    pending.push((
                        *task_id,
                        *task_id.as_uuid(),
                        entry.version,
                        patch.to_updates(),
                    ));
                }
            }
        }

        // Phase two: fan out, one independent retry run per record.
        let policy = &self.config.retry;
        let table = &self.tasks;
        let results =
            futures::future::join_all(pending.into_iter().map(|(task_id, id, expected, set)| {
                async move {
                    let outcome =
                        run_with_retry(policy, "task.reorder", RetryHooks::default(), || {
                            table.conditional_update(id, expected, set.clone())
                        })
                        .await;
                    (task_id, outcome)
                }
            }))
            .await;

        // Phase three: reconcile the cache from what actually landed.
        let mut report = ReorderReport {
            applied: Vec::new(),
            failed,
        };
        for (task_id, outcome) in results {
            match outcome {
                Ok(row) => match task_from_row(&row) {
                    Ok(synced) => {
                        self.cache.insert(task_id, synced);
                        report.applied.push(task_id);
                    }
                    Err(core) => report.failed.push((task_id, SyncError::Core(core))),
                },
                Err(failure) => {
                    report
                        .failed
                        .push((task_id, SyncError::from_write_failure(failure, task_id)));
                }
            }
        }
        if !report.fully_applied() {
            warn!(
                applied = report.applied.len(),
                failed = report.failed.len(),
                "reorder partially applied"
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_session(&self) -> Result<&AuthSession, SyncError> {
        self.session.as_ref().ok_or(SyncError::NoSession)
    }

    /// Mode-aware current copy without touching the network.
    fn peek(&self, task_id: TaskId) -> Result<Task, SyncError> {
        if self.session.is_some() {
            self.cache
                .get(&task_id)
                .map(|s| s.task.clone())
                .ok_or(SyncError::UnknownTask(task_id))
        } else {
            self.local
                .get(task_id)?
                .ok_or(SyncError::UnknownTask(task_id))
        }
    }

    /// Last-known copy, fetching from remote only when the record has never
    /// been seen.
    async fn known_record(&mut self, task_id: TaskId) -> Result<SyncedTask, SyncError> {
        if let Some(entry) = self.cache.get(&task_id) {
            return Ok(entry.clone());
        }
        self.refresh_record(task_id).await
    }

    async fn known_version(&mut self, task_id: TaskId) -> Result<Version, SyncError> {
        Ok(self.known_record(task_id).await?.version)
    }

    /// Re-fetches one record and refreshes the cache with the authoritative
    /// copy. A record that no longer exists remotely is evicted.
    async fn refresh_record(&mut self, task_id: TaskId) -> Result<SyncedTask, SyncError> {
        let id = *task_id.as_uuid();
        let row = run_with_retry(
            &self.config.retry,
            "task.fetch",
            RetryHooks::default(),
            || self.tasks.fetch(id),
        )
        .await
        .map_err(SyncError::from_remote_failure)?;

        match row {
            Some(row) => {
                let synced = task_from_row(&row)?;
                self.cache.insert(task_id, synced.clone());
                Ok(synced)
            }
            None => {
                self.cache.remove(&task_id);
                Err(SyncError::UnknownTask(task_id))
            }
        }
    }

    /// One conditional update through the retry runner. On conflict the
    /// record is reloaded before the error surfaces, so the cache never keeps
    /// the optimistic value.
    async fn write_once(
        &mut self,
        op: &'static str,
        task_id: TaskId,
        expected: Version,
        set: FieldUpdates,
    ) -> Result<Task, SyncError> {
        let id = *task_id.as_uuid();
        let outcome = run_with_retry(&self.config.retry, op, RetryHooks::default(), || {
            self.tasks.conditional_update(id, expected, set.clone())
        })
        .await;

        match outcome {
            Ok(row) => {
                let synced = task_from_row(&row)?;
                let task = synced.task.clone();
                self.cache.insert(task_id, synced);
                Ok(task)
            }
            Err(failure) => {
                if matches!(failure.source, WriteError::Conflict { .. }) {
                    warn!(task = %task_id, op, "write conflict, reloading record");
                    self.refresh_record(task_id).await?;
                }
                Err(SyncError::from_write_failure(failure, task_id))
            }
        }
    }
}
