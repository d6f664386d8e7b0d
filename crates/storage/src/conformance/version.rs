use std::future::Future;

use super::{make_authorization, TestResult};
use crate::record::AuthorizationStatus;
use crate::{EngineStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "update_increments_version",
        update_increments_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_expected_version_rejected",
        stale_expected_version_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_unknown_authorization_rejected",
        update_unknown_authorization_rejected(factory).await,
    ));

    results
}

async fn update_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("put: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit create: {e}"))?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    let new_version = storage
        .update_authorization_status(&mut snap, "auth-1", 0, AuthorizationStatus::RenewalRequested)
        .await
        .map_err(|e| format!("update: {e}"))?;
    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit update: {e}"))?;

    let auth = storage
        .get_authorization("auth-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if auth.version != 1 {
        return Err(format!("committed version is {}, expected 1", auth.version));
    }
    if auth.status != AuthorizationStatus::RenewalRequested {
        return Err(format!("status not applied: {:?}", auth.status));
    }
    Ok(())
}

async fn stale_expected_version_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("put: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit create: {e}"))?;

    // First update moves the row to version 1.
    let mut s1 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    storage
        .update_authorization_status(&mut s1, "auth-1", 0, AuthorizationStatus::RenewalRequested)
        .await
        .map_err(|e| format!("update 1: {e}"))?;
    storage
        .commit_snapshot(s1)
        .await
        .map_err(|e| format!("commit 1: {e}"))?;

    // A second update still carrying expected_version 0 must fail, either
    // eagerly at staging or at commit.
    let mut s2 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 3: {e}"))?;
    let staged = storage
        .update_authorization_status(&mut s2, "auth-1", 0, AuthorizationStatus::Expired)
        .await;
    let outcome = match staged {
        Err(e) => Err(e),
        Ok(_) => storage.commit_snapshot(s2).await,
    };
    match outcome {
        Err(StorageError::VersionConflict {
            authorization_id,
            expected_version,
        }) => {
            if authorization_id != "auth-1" || expected_version != 0 {
                return Err(format!(
                    "wrong conflict detail: {authorization_id} / {expected_version}"
                ));
            }
        }
        Err(e) => return Err(format!("expected VersionConflict, got {e}")),
        Ok(()) => return Err("stale update committed".to_string()),
    }

    // Winner's state survives.
    let auth = storage
        .get_authorization("auth-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if auth.status != AuthorizationStatus::RenewalRequested || auth.version != 1 {
        return Err(format!(
            "winner clobbered: status {:?}, version {}",
            auth.status, auth.version
        ));
    }
    Ok(())
}

async fn update_unknown_authorization_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let staged = storage
        .update_authorization_status(&mut snap, "no-such", 0, AuthorizationStatus::Expired)
        .await;
    let outcome = match staged {
        Err(e) => Err(e),
        Ok(_) => storage.commit_snapshot(snap).await,
    };
    match outcome {
        Err(StorageError::AuthorizationNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected AuthorizationNotFound, got {e}")),
        Ok(()) => Err("update of unknown authorization committed".to_string()),
    }
}
