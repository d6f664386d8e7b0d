use std::future::Future;

use autopilot_core::{
    ActionType, AutomationRule, Baseline, ClaimOutcome, CompareOp, Predicate, TriggerKind,
};
use time::macros::datetime;
use time::OffsetDateTime;

use super::{make_execution_log, make_signal, TestResult};
use crate::{EngineStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "failed_commit_applies_nothing",
        failed_commit_applies_nothing(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "signal_counts_respect_window",
        signal_counts_respect_window(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "denied_codes_distinct",
        denied_codes_distinct(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "baseline_upsert_replaces",
        baseline_upsert_replaces(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "enabled_rules_in_creation_order",
        enabled_rules_in_creation_order(factory).await,
    ));

    results
}

fn make_rule(id: &str, name: &str, created_at: OffsetDateTime, enabled: bool) -> AutomationRule {
    AutomationRule {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        name: name.to_string(),
        trigger: TriggerKind::BehaviorShift,
        condition: Predicate::Compare {
            field: "current_rate".to_string(),
            op: CompareOp::Gte,
            value: serde_json::json!(0.2),
        },
        action_type: ActionType::HoldClaim,
        action_params: std::collections::BTreeMap::new(),
        enabled,
        escalate_on_error: true,
        created_at,
    }
}

/// A snapshot mixing a valid write with a constraint-violating one must
/// apply neither.
async fn failed_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_execution_log(&mut s1, make_execution_log("log-1", "key-1"))
        .await
        .map_err(|e| format!("insert log: {e}"))?;
    storage
        .commit_snapshot(s1)
        .await
        .map_err(|e| format!("commit 1: {e}"))?;

    let mut s2 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    storage
        .insert_signal(&mut s2, make_signal("tenant-9", "UHC", ClaimOutcome::Paid))
        .await
        .map_err(|e| format!("insert signal: {e}"))?;
    storage
        .insert_execution_log(&mut s2, make_execution_log("log-2", "key-1"))
        .await
        .map_err(|e| format!("insert dup log: {e}"))?;

    match storage.commit_snapshot(s2).await {
        Err(StorageError::DuplicateIdempotencyKey { .. }) => {}
        Err(e) => return Err(format!("expected DuplicateIdempotencyKey, got {e}")),
        Ok(()) => return Err("conflicting commit succeeded".to_string()),
    }

    let tenants = storage
        .list_tenants()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if tenants.contains(&"tenant-9".to_string()) {
        return Err("partial commit: signal from failed snapshot visible".to_string());
    }
    Ok(())
}

async fn signal_counts_respect_window<S, F, Fut>(factory: &F) -> Result<(), String>
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
    // Two inside the window, one denied; one decided outside it.
    let mut inside_denied = make_signal("tenant-1", "BCBS", ClaimOutcome::Denied);
    inside_denied.decided_at = Some(datetime!(2026-08-05 00:00:00 UTC));
    let mut inside_paid = make_signal("tenant-1", "BCBS", ClaimOutcome::Paid);
    inside_paid.decided_at = Some(datetime!(2026-08-06 00:00:00 UTC));
    let mut outside = make_signal("tenant-1", "BCBS", ClaimOutcome::Denied);
    outside.decided_at = Some(datetime!(2026-07-01 00:00:00 UTC));
    for s in [inside_denied, inside_paid, outside] {
        storage
            .insert_signal(&mut snap, s)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let (denied, total) = storage
        .signal_counts(
            "tenant-1",
            "BCBS",
            datetime!(2026-08-01 00:00:00 UTC),
            datetime!(2026-08-08 00:00:00 UTC),
        )
        .await
        .map_err(|e| format!("counts: {e}"))?;
    if (denied, total) != (1, 2) {
        return Err(format!("expected (1, 2), got ({denied}, {total})"));
    }
    Ok(())
}

async fn denied_codes_distinct<S, F, Fut>(factory: &F) -> Result<(), String>
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
    for code in ["99213", "99213", "99214"] {
        let mut s = make_signal("tenant-1", "BCBS", ClaimOutcome::Denied);
        s.procedure_code = code.to_string();
        storage
            .insert_signal(&mut snap, s)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut codes = storage
        .denied_codes(
            "tenant-1",
            "BCBS",
            datetime!(2026-08-01 00:00:00 UTC),
            datetime!(2026-08-31 00:00:00 UTC),
        )
        .await
        .map_err(|e| format!("codes: {e}"))?;
    codes.sort();
    if codes != vec!["99213".to_string(), "99214".to_string()] {
        return Err(format!("expected distinct codes, got {codes:?}"));
    }
    Ok(())
}

async fn baseline_upsert_replaces<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;

    let baseline = |rate: f64| Baseline {
        tenant_id: "tenant-1".to_string(),
        payer: "BCBS".to_string(),
        procedure_code: "99213".to_string(),
        denial_rate: rate,
        sample_size: 100,
        confidence: 1.0,
        computed_at: datetime!(2026-08-10 00:00:00 UTC),
    };

    let mut s1 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .upsert_baseline(&mut s1, baseline(0.20))
        .await
        .map_err(|e| format!("upsert: {e}"))?;
    storage
        .commit_snapshot(s1)
        .await
        .map_err(|e| format!("commit 1: {e}"))?;

    let mut s2 = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin 2: {e}"))?;
    storage
        .upsert_baseline(&mut s2, baseline(0.35))
        .await
        .map_err(|e| format!("upsert 2: {e}"))?;
    storage
        .commit_snapshot(s2)
        .await
        .map_err(|e| format!("commit 2: {e}"))?;

    let got = storage
        .get_baseline("tenant-1", "BCBS", "99213")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("baseline missing after upsert")?;
    if (got.denial_rate - 0.35).abs() > f64::EPSILON {
        return Err(format!("expected rate 0.35, got {}", got.denial_rate));
    }
    Ok(())
}

async fn enabled_rules_in_creation_order<S, F, Fut>(factory: &F) -> Result<(), String>
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
    // Inserted out of creation order; one disabled.
    storage
        .put_rule(
            &mut snap,
            make_rule("rule-b", "later", datetime!(2026-08-02 00:00:00 UTC), true),
        )
        .await
        .map_err(|e| format!("put b: {e}"))?;
    storage
        .put_rule(
            &mut snap,
            make_rule("rule-a", "earlier", datetime!(2026-08-01 00:00:00 UTC), true),
        )
        .await
        .map_err(|e| format!("put a: {e}"))?;
    storage
        .put_rule(
            &mut snap,
            make_rule("rule-c", "disabled", datetime!(2026-08-03 00:00:00 UTC), false),
        )
        .await
        .map_err(|e| format!("put c: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let rules = storage
        .list_enabled_rules("tenant-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    if ids != vec!["rule-a", "rule-b"] {
        return Err(format!("expected [rule-a, rule-b], got {ids:?}"));
    }
    Ok(())
}
