use std::sync::Arc;
use std::time::Duration;

use tasksync_core::Version;
use tasksync_core::ids::{TaskId, UserId};
use tasksync_core::session::AuthSession;
use tasksync_core::task::{SyncedTask, Task, TaskDraft};
use tasksync_engine::{RetryPolicy, SyncConfig, SyncError, TaskRepository};
use tasksync_storage::{LocalTaskStore, RemoteTable, StorageError};

use crate::remote::InMemoryRemote;

/// One simulated app instance: a repository wired to a (possibly shared)
/// fake remote plus a private in-memory fallback store.
pub struct TestClient {
    pub remote: Arc<InMemoryRemote>,
    pub repo: TaskRepository,
    pub user_id: UserId,
}

impl TestClient {
    /// Client with no session: every operation must resolve locally.
    pub fn offline() -> Result<Self, StorageError> {
        Self::build(Arc::new(InMemoryRemote::new()), UserId::new())
    }

    /// Signed-in client over a fresh remote.
    pub async fn signed_in() -> Result<Self, Box<dyn std::error::Error>> {
        Self::sign_in_to(Arc::new(InMemoryRemote::new())).await
    }

    /// Signed-in client over an existing remote (fresh user).
    pub async fn sign_in_to(
        remote: Arc<InMemoryRemote>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let user_id = UserId::new();
        let mut client = Self::build(remote, user_id)?;
        client
            .repo
            .sign_in(AuthSession::new(user_id, "test-token")?)
            .await?;
        Ok(client)
    }

    /// A second device for the same user, sharing the remote store.
    pub async fn same_user(other: &TestClient) -> Result<Self, Box<dyn std::error::Error>> {
        let mut client = Self::build(other.remote.clone(), other.user_id)?;
        client
            .repo
            .sign_in(AuthSession::new(other.user_id, "other-device")?)
            .await?;
        Ok(client)
    }

    fn build(remote: Arc<InMemoryRemote>, user_id: UserId) -> Result<Self, StorageError> {
        let local = LocalTaskStore::open_in_memory()?;
        let handle: Arc<dyn RemoteTable> = remote.clone();
        let repo = TaskRepository::new(handle, local, test_config());
        Ok(Self {
            remote,
            repo,
            user_id,
        })
    }

    pub async fn add_task(&mut self, title: &str) -> Result<Task, SyncError> {
        self.repo.create(TaskDraft::new(title)).await
    }
}

/// Millisecond-scale retry budget so fault-injection tests stay fast while
/// keeping the default shape (3 retries, factor 2).
pub fn test_config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        },
        conflict_retries: 3,
    }
}

/// A freshly-created synced record for seeding the fake remote.
pub fn synced_task(owner: UserId, title: &str, position: u32) -> SyncedTask {
    let task = TaskDraft::new(title).into_task(TaskId::new(), position, 0);
    SyncedTask {
        task,
        owner,
        version: Version::INITIAL,
    }
}
