use std::future::Future;
use std::sync::Arc;

use super::{make_authorization, make_execution_log, TestResult};
use crate::record::AuthorizationStatus;
use crate::{EngineStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "same_idempotency_key_exactly_one_wins",
        same_idempotency_key_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "distinct_keys_all_succeed",
        distinct_keys_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "occ_updates_exactly_one_wins",
        occ_updates_exactly_one_wins(factory).await,
    ));

    results
}

// ── Idempotency race: exactly one wins ──────────────────────────────────────

/// N tasks each open a snapshot and stage an execution-log entry with the
/// SAME idempotency key. Exactly one commit succeeds; the rest must get
/// DuplicateIdempotencyKey.
///
/// This exercises real concurrency with `tokio::spawn`; the backend's
/// commit-time uniqueness check is the only thing deciding the race.
async fn same_idempotency_key_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.insert_execution_log(
                &mut snap,
                make_execution_log(&format!("log-{i}"), "contested-key"),
            )
            .await?;
            match s.commit_snapshot(snap).await {
                Ok(()) => Ok(true),
                Err(StorageError::DuplicateIdempotencyKey { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    // Exactly one committed record under the key.
    let logs = storage
        .list_execution_logs("tenant-1", None, 0)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if logs.len() != 1 {
        return Err(format!("expected 1 committed log, got {}", logs.len()));
    }
    Ok(())
}

/// N tasks commit N distinct keys. All succeed; no false conflicts.
async fn distinct_keys_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.insert_execution_log(
                &mut snap,
                make_execution_log(&format!("log-{i}"), &format!("key-{i}")),
            )
            .await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    let logs = storage
        .list_execution_logs("tenant-1", None, 0)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if logs.len() != N {
        return Err(format!("expected {N} committed logs, got {}", logs.len()));
    }
    Ok(())
}

// ── OCC race: exactly one wins ──────────────────────────────────────────────

/// N tasks all try to move the same authorization from version 0. Exactly
/// one commit lands; the rest must get VersionConflict at staging or at
/// commit. Final state is version 1 in the target status.
async fn occ_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .put_authorization(&mut snap, make_authorization("auth-1"))
            .await
            .map_err(|e| format!("put: {e}"))?;
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit create: {e}"))?;
    }

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .update_authorization_status(
                    &mut snap,
                    "auth-1",
                    0,
                    AuthorizationStatus::RenewalRequested,
                )
                .await;
            match staged {
                Ok(_) => match s.commit_snapshot(snap).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::VersionConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::VersionConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let auth = storage
        .get_authorization("auth-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if auth.version != 1 {
        return Err(format!("expected final version 1, got {}", auth.version));
    }
    if auth.status != AuthorizationStatus::RenewalRequested {
        return Err(format!("expected RenewalRequested, got {:?}", auth.status));
    }
    Ok(())
}
