use std::future::Future;

use super::{make_alert, make_execution_log, TestResult};
use crate::{EngineStorage, StorageError};

pub(super) async fn run_idempotency_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "idempotency",
        "duplicate_key_rejected_across_commits",
        duplicate_key_rejected_across_commits(factory).await,
    ));
    results.push(TestResult::from_result(
        "idempotency",
        "duplicate_key_rejected_within_snapshot",
        duplicate_key_rejected_within_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "idempotency",
        "committed_log_readable_by_key",
        committed_log_readable_by_key(factory).await,
    ));
    results.push(TestResult::from_result(
        "idempotency",
        "one_alert_per_log_entry",
        one_alert_per_log_entry(factory).await,
    ));

    results
}

async fn duplicate_key_rejected_across_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    let mut s1 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_execution_log(&mut s1, make_execution_log("log-1", "shared-key"))
        .await
        .map_err(|e| format!("insert 1: {e}"))?;
    storage
        .commit_snapshot(s1)
        .await
        .map_err(|e| format!("commit 1: {e}"))?;

    let mut s2 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    // Staging must succeed; the constraint fires at commit.
    storage
        .insert_execution_log(&mut s2, make_execution_log("log-2", "shared-key"))
        .await
        .map_err(|e| format!("insert 2 (should stage): {e}"))?;
    match storage.commit_snapshot(s2).await {
        Err(StorageError::DuplicateIdempotencyKey { idempotency_key }) => {
            if idempotency_key != "shared-key" {
                return Err(format!("wrong key in error: {idempotency_key}"));
            }
        }
        Err(e) => return Err(format!("expected DuplicateIdempotencyKey, got {e}")),
        Ok(()) => return Err("duplicate key committed".to_string()),
    }

    // The original record is intact.
    let existing = storage
        .get_execution_log_by_key("shared-key")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("original record missing")?;
    if existing.id != "log-1" {
        return Err(format!("expected log-1 to survive, got {}", existing.id));
    }
    Ok(())
}

async fn duplicate_key_rejected_within_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_execution_log(&mut snap, make_execution_log("log-1", "k"))
        .await
        .map_err(|e| format!("insert 1: {e}"))?;
    storage
        .insert_execution_log(&mut snap, make_execution_log("log-2", "k"))
        .await
        .map_err(|e| format!("insert 2 (should stage): {e}"))?;

    match storage.commit_snapshot(snap).await {
        Err(StorageError::DuplicateIdempotencyKey { .. }) => Ok(()),
        Err(e) => Err(format!("expected DuplicateIdempotencyKey, got {e}")),
        Ok(()) => Err("same-snapshot duplicate committed".to_string()),
    }
}

async fn committed_log_readable_by_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    if storage
        .get_execution_log_by_key("missing")
        .await
        .map_err(|e| format!("get missing: {e}"))?
        .is_some()
    {
        return Err("unknown key returned a record".to_string());
    }

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_execution_log(&mut snap, make_execution_log("log-1", "key-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let rec = storage
        .get_execution_log_by_key("key-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("committed record not found by key")?;
    if rec.confirmation_id.as_deref() != Some("conf-123") {
        return Err(format!("confirmation lost: {:?}", rec.confirmation_id));
    }
    Ok(())
}

async fn one_alert_per_log_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    let mut s1 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_alert(&mut s1, make_alert("alert-1", "log-1"))
        .await
        .map_err(|e| format!("insert 1: {e}"))?;
    storage
        .commit_snapshot(s1)
        .await
        .map_err(|e| format!("commit 1: {e}"))?;

    let mut s2 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    storage
        .insert_alert(&mut s2, make_alert("alert-2", "log-1"))
        .await
        .map_err(|e| format!("insert 2 (should stage): {e}"))?;
    match storage.commit_snapshot(s2).await {
        Err(StorageError::DuplicateAlert { execution_log_id }) => {
            if execution_log_id != "log-1" {
                return Err(format!("wrong log id in error: {execution_log_id}"));
            }
        }
        Err(e) => return Err(format!("expected DuplicateAlert, got {e}")),
        Ok(()) => return Err("duplicate alert committed".to_string()),
    }

    let alerts = storage
        .list_alerts("tenant-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if alerts.len() != 1 {
        return Err(format!("expected 1 alert, got {}", alerts.len()));
    }
    Ok(())
}
