use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tasksync_core::Version;
use tasksync_core::ids::{TaskId, UserId};
use tasksync_core::task::TaskPatch;
use tasksync_core::wire::{FieldUpdates, TASKS_TABLE, task_to_row};
use tasksync_engine::{
    GiveUpReason, RetryHooks, RetryPolicy, VersionedTable, WriteError, run_with_retry,
};
use tasksync_harness::{InMemoryRemote, synced_task};
use tasksync_storage::RemoteError;

fn table(remote: &Arc<InMemoryRemote>) -> VersionedTable {
    VersionedTable::new(remote.clone(), TASKS_TABLE)
}

fn set_title(title: &str) -> FieldUpdates {
    TaskPatch {
        title: Some(title.into()),
        ..Default::default()
    }
    .to_updates()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_factor: 2.0,
    }
}

// ============================================================================
// Version protocol
// ============================================================================

#[tokio::test]
async fn insert_assigns_the_initial_version() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);

    let mut seeded = synced_task(UserId::new(), "fresh", 0);
    seeded.version = Version::new(9);
    let stored = tasks.insert(task_to_row(&seeded)).await.unwrap();

    // The store, not the client, owns version assignment.
    assert_eq!(stored.version, Version::INITIAL);
}

#[tokio::test]
async fn versions_advance_by_one_regardless_of_failed_attempts() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "counted", 0)))
        .await
        .unwrap();

    let mut version = row.version;
    for i in 0..5u32 {
        // A stale writer loses without advancing the version.
        let stale = tasks
            .conditional_update(row.id, Version::new(999), set_title("stale"))
            .await;
        assert!(matches!(stale, Err(WriteError::Conflict { .. })));

        let updated = tasks
            .conditional_update(row.id, version, set_title(&format!("rev {i}")))
            .await
            .unwrap();
        assert_eq!(updated.version, version.next());
        version = updated.version;
    }

    // N accepted writes: creation version + N, no gaps from the rejects.
    assert_eq!(version.get(), Version::INITIAL.get() + 5);
}

// ============================================================================
// At-most-one-winner
// ============================================================================

#[tokio::test]
async fn same_expected_version_has_at_most_one_winner() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "raced", 0)))
        .await
        .unwrap();

    let first = tasks
        .conditional_update(row.id, Version::INITIAL, set_title("first wins"))
        .await;
    let second = tasks
        .conditional_update(row.id, Version::INITIAL, set_title("second loses"))
        .await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(WriteError::Conflict { .. })));

    let stored = remote.row(TASKS_TABLE, row.id).await.unwrap();
    assert_eq!(stored.version, Version::INITIAL.next());
    assert_eq!(
        stored.fields.get("title").and_then(|v| v.as_text()),
        Some("first wins")
    );
}

#[tokio::test]
async fn concurrent_writers_produce_exactly_one_winner() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "raced", 0)))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        tasks.conditional_update(row.id, Version::INITIAL, set_title("writer a")),
        tasks.conditional_update(row.id, Version::INITIAL, set_title("writer b")),
    );

    let winners = usize::from(a.is_ok()) + usize::from(b.is_ok());
    assert_eq!(winners, 1);

    // Exactly one applied update is visible.
    let stored = remote.row(TASKS_TABLE, row.id).await.unwrap();
    assert_eq!(stored.version, Version::INITIAL.next());
}

// ============================================================================
// Conflict vs transient-fault handling
// ============================================================================

#[tokio::test]
async fn a_conflict_is_never_retried_by_the_runner() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "stale", 0)))
        .await
        .unwrap();
    let updates_before = remote.update_calls.load(Ordering::SeqCst);

    let policy = quick_policy();
    let result = run_with_retry(&policy, "test.update", RetryHooks::default(), || {
        tasks.conditional_update(row.id, Version::new(42), set_title("doomed"))
    })
    .await;

    let failure = result.unwrap_err();
    assert_eq!(failure.reason, GiveUpReason::NonRetryable);
    assert!(matches!(failure.source, WriteError::Conflict { .. }));
    // One attempt only: a version miss is a logical outcome, not a fault.
    assert_eq!(remote.update_calls.load(Ordering::SeqCst) - updates_before, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_faults_inside_a_conditional_update_are_retried() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "flaky", 0)))
        .await
        .unwrap();

    remote.fail_next_n(2, RemoteError::Timeout);
    let policy = quick_policy();
    let updated = run_with_retry(&policy, "test.update", RetryHooks::default(), || {
        tasks.conditional_update(row.id, Version::INITIAL, set_title("landed"))
    })
    .await
    .unwrap();

    // Three calls (two faults, one success), one applied write.
    assert_eq!(remote.update_calls.load(Ordering::SeqCst), 3);
    assert_eq!(updated.version, Version::INITIAL.next());
    let stored = remote.row(TASKS_TABLE, row.id).await.unwrap();
    assert_eq!(
        stored.fields.get("title").and_then(|v| v.as_text()),
        Some("landed")
    );
}

#[tokio::test]
async fn unknown_record_id_reports_zero_rows_as_conflict() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);

    let ghost = *TaskId::new().as_uuid();
    let result = tasks
        .conditional_update(ghost, Version::INITIAL, set_title("nobody home"))
        .await;

    // Id miss and version miss are indistinguishable to the caller.
    assert!(matches!(result, Err(WriteError::Conflict { .. })));
}

#[tokio::test]
async fn delete_ignores_versions_and_is_idempotent() {
    let remote = Arc::new(InMemoryRemote::new());
    let tasks = table(&remote);
    let row = tasks
        .insert(task_to_row(&synced_task(UserId::new(), "going", 0)))
        .await
        .unwrap();

    // Another device advances the version; delete does not care.
    remote
        .bump_version(TASKS_TABLE, row.id, set_title("renamed"))
        .await
        .unwrap();

    tasks.delete(row.id).await.unwrap();
    assert!(remote.row(TASKS_TABLE, row.id).await.is_none());
    tasks.delete(row.id).await.unwrap();
}
