use std::future::Future;

use autopilot_core::ClaimOutcome;

use super::{make_authorization, make_signal, TestResult};
use crate::EngineStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_writes_invisible",
        uncommitted_writes_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "committed_writes_visible",
        committed_writes_visible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_writes",
        abort_discards_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));

    results
}

/// Writes staged on an open snapshot must not be visible to queries until
/// the snapshot commits.
async fn uncommitted_writes_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_signal(&mut snap, make_signal("tenant-1", "BCBS", ClaimOutcome::Denied))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let tenants = storage
        .list_tenants()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !tenants.is_empty() {
        return Err(format!("uncommitted signal visible: tenants = {tenants:?}"));
    }

    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    Ok(())
}

async fn committed_writes_visible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_signal(&mut snap, make_signal("tenant-1", "BCBS", ClaimOutcome::Paid))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .put_authorization(&mut snap, make_authorization("auth-1"))
        .await
        .map_err(|e| format!("put auth: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let tenants = storage
        .list_tenants()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if tenants != vec!["tenant-1".to_string()] {
        return Err(format!("expected [tenant-1], got {tenants:?}"));
    }
    let auth = storage
        .get_authorization("auth-1")
        .await
        .map_err(|e| format!("get auth: {e}"))?;
    if auth.version != 0 {
        return Err(format!("expected version 0 after create, got {}", auth.version));
    }
    Ok(())
}

async fn abort_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .put_authorization(&mut snap, make_authorization("auth-1"))
        .await
        .map_err(|e| format!("put auth: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match storage.get_authorization("auth-1").await {
        Ok(_) => Err("aborted authorization still readable".to_string()),
        Err(crate::StorageError::AuthorizationNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected AuthorizationNotFound, got {e}")),
    }
}

/// A snapshot dropped without commit or abort must roll back.
async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_signal(&mut snap, make_signal("tenant-1", "Aetna", ClaimOutcome::Denied))
            .await
            .map_err(|e| format!("insert: {e}"))?;
        // snap dropped here
    }

    let tenants = storage
        .list_tenants()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !tenants.is_empty() {
        return Err(format!("dropped snapshot leaked writes: {tenants:?}"));
    }
    Ok(())
}
