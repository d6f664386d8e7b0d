//! In-memory reference backend.
//!
//! Mutations are staged on the snapshot and applied atomically at commit
//! under a single lock, where all uniqueness and version constraints are
//! validated. Two concurrent snapshots staging the same idempotency key
//! both accept the insert; the first commit wins and the second fails with
//! `DuplicateIdempotencyKey` -- the same shape a relational backend gets
//! from a unique index.
//!
//! Dropping a snapshot without committing discards its staged ops.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autopilot_core::{AutomationRule, Baseline, Signal};
use time::{Date, OffsetDateTime};

use crate::error::StorageError;
use crate::record::{
    AlertRecord, AuthorizationRecord, AuthorizationStatus, ExecutionLogRecord, ExecutionResult,
};
use crate::traits::EngineStorage;

#[derive(Debug, Clone)]
enum StagedOp {
    InsertSignal(Signal),
    UpsertBaseline(Baseline),
    InsertExecutionLog(ExecutionLogRecord),
    InsertAlert(AlertRecord),
    PutRule(AutomationRule),
    PutAuthorization(AuthorizationRecord),
    UpdateAuthorizationStatus {
        authorization_id: String,
        expected_version: i64,
        new_status: AuthorizationStatus,
    },
}

/// Staged, uncommitted mutations. Dropping this rolls back.
pub struct MemorySnapshot {
    ops: Vec<StagedOp>,
}

#[derive(Default)]
struct Inner {
    signals: Vec<Signal>,
    baselines: BTreeMap<(String, String, String), Baseline>,
    execution_logs: Vec<ExecutionLogRecord>,
    log_keys: BTreeSet<String>,
    alerts: Vec<AlertRecord>,
    alert_log_ids: BTreeSet<String>,
    rules: BTreeMap<String, AutomationRule>,
    authorizations: BTreeMap<String, AuthorizationRecord>,
}

/// Reference `EngineStorage` backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Recover data even if the mutex was poisoned by a panic elsewhere
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate every staged op against committed state, then apply.
    /// All-or-nothing: the first violation aborts the whole batch.
    fn commit_ops(&self, ops: Vec<StagedOp>) -> Result<(), StorageError> {
        let mut inner = self.lock();

        // Phase 1: constraint validation, tracking effects staged earlier
        // in the same batch.
        let mut batch_keys: BTreeSet<String> = BTreeSet::new();
        let mut batch_alert_ids: BTreeSet<String> = BTreeSet::new();
        let mut batch_versions: BTreeMap<String, i64> = BTreeMap::new();

        for op in &ops {
            match op {
                StagedOp::InsertExecutionLog(rec) => {
                    if inner.log_keys.contains(&rec.idempotency_key)
                        || !batch_keys.insert(rec.idempotency_key.clone())
                    {
                        return Err(StorageError::DuplicateIdempotencyKey {
                            idempotency_key: rec.idempotency_key.clone(),
                        });
                    }
                }
                StagedOp::InsertAlert(rec) => {
                    if inner.alert_log_ids.contains(&rec.execution_log_id)
                        || !batch_alert_ids.insert(rec.execution_log_id.clone())
                    {
                        return Err(StorageError::DuplicateAlert {
                            execution_log_id: rec.execution_log_id.clone(),
                        });
                    }
                }
                StagedOp::UpdateAuthorizationStatus {
                    authorization_id,
                    expected_version,
                    ..
                } => {
                    let committed = inner.authorizations.get(authorization_id).ok_or_else(|| {
                        StorageError::AuthorizationNotFound {
                            authorization_id: authorization_id.clone(),
                        }
                    })?;
                    let current = batch_versions
                        .get(authorization_id)
                        .copied()
                        .unwrap_or(committed.version);
                    if current != *expected_version {
                        return Err(StorageError::VersionConflict {
                            authorization_id: authorization_id.clone(),
                            expected_version: *expected_version,
                        });
                    }
                    batch_versions.insert(authorization_id.clone(), current + 1);
                }
                _ => {}
            }
        }

        // Phase 2: apply.
        for op in ops {
            match op {
                StagedOp::InsertSignal(signal) => inner.signals.push(signal),
                StagedOp::UpsertBaseline(b) => {
                    let key = (b.tenant_id.clone(), b.payer.clone(), b.procedure_code.clone());
                    inner.baselines.insert(key, b);
                }
                StagedOp::InsertExecutionLog(rec) => {
                    inner.log_keys.insert(rec.idempotency_key.clone());
                    inner.execution_logs.push(rec);
                }
                StagedOp::InsertAlert(rec) => {
                    inner.alert_log_ids.insert(rec.execution_log_id.clone());
                    inner.alerts.push(rec);
                }
                StagedOp::PutRule(rule) => {
                    inner.rules.insert(rule.id.clone(), rule);
                }
                StagedOp::PutAuthorization(rec) => {
                    inner.authorizations.insert(rec.id.clone(), rec);
                }
                StagedOp::UpdateAuthorizationStatus {
                    authorization_id,
                    new_status,
                    ..
                } => {
                    if let Some(auth) = inner.authorizations.get_mut(&authorization_id) {
                        auth.status = new_status;
                        auth.version += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EngineStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        Ok(MemorySnapshot { ops: Vec::new() })
    }

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        self.commit_ops(snapshot.ops)
    }

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_signal(
        &self,
        snapshot: &mut Self::Snapshot,
        signal: Signal,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::InsertSignal(signal));
        Ok(())
    }

    async fn upsert_baseline(
        &self,
        snapshot: &mut Self::Snapshot,
        baseline: Baseline,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::UpsertBaseline(baseline));
        Ok(())
    }

    async fn insert_execution_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ExecutionLogRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::InsertExecutionLog(record));
        Ok(())
    }

    async fn insert_alert(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AlertRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::InsertAlert(record));
        Ok(())
    }

    async fn put_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        rule: AutomationRule,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::PutRule(rule));
        Ok(())
    }

    async fn put_authorization(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AuthorizationRecord,
    ) -> Result<(), StorageError> {
        snapshot.ops.push(StagedOp::PutAuthorization(record));
        Ok(())
    }

    async fn update_authorization_status(
        &self,
        snapshot: &mut Self::Snapshot,
        authorization_id: &str,
        expected_version: i64,
        new_status: AuthorizationStatus,
    ) -> Result<i64, StorageError> {
        // Validate eagerly against committed state so callers see stale
        // versions early; commit re-validates to close the race.
        {
            let inner = self.lock();
            let auth = inner.authorizations.get(authorization_id).ok_or_else(|| {
                StorageError::AuthorizationNotFound {
                    authorization_id: authorization_id.to_string(),
                }
            })?;
            if auth.version != expected_version {
                return Err(StorageError::VersionConflict {
                    authorization_id: authorization_id.to_string(),
                    expected_version,
                });
            }
        }
        snapshot.ops.push(StagedOp::UpdateAuthorizationStatus {
            authorization_id: authorization_id.to_string(),
            expected_version,
            new_status,
        });
        Ok(expected_version + 1)
    }

    async fn list_tenants(&self) -> Result<Vec<String>, StorageError> {
        let inner = self.lock();
        let mut tenants: Vec<String> = inner
            .signals
            .iter()
            .map(|s| s.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn list_decided_signals(
        &self,
        tenant_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Signal>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .signals
            .iter()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && matches!(s.decided_at, Some(d) if d >= from && d < to)
            })
            .cloned()
            .collect())
    }

    async fn signal_counts(
        &self,
        tenant_id: &str,
        payer: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<(u64, u64), StorageError> {
        let inner = self.lock();
        let mut denied = 0u64;
        let mut total = 0u64;
        for s in inner.signals.iter().filter(|s| {
            s.tenant_id == tenant_id
                && s.payer == payer
                && matches!(s.decided_at, Some(d) if d >= from && d < to)
        }) {
            total += 1;
            if s.outcome == autopilot_core::ClaimOutcome::Denied {
                denied += 1;
            }
        }
        Ok((denied, total))
    }

    async fn denied_codes(
        &self,
        tenant_id: &str,
        payer: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<String>, StorageError> {
        let inner = self.lock();
        let codes: BTreeSet<String> = inner
            .signals
            .iter()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && s.payer == payer
                    && s.outcome == autopilot_core::ClaimOutcome::Denied
                    && matches!(s.decided_at, Some(d) if d >= from && d < to)
            })
            .map(|s| s.procedure_code.clone())
            .collect();
        Ok(codes.into_iter().collect())
    }

    async fn count_denials_since(
        &self,
        tenant_id: &str,
        payer: &str,
        since: OffsetDateTime,
    ) -> Result<u64, StorageError> {
        let inner = self.lock();
        Ok(inner
            .signals
            .iter()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && s.payer == payer
                    && s.outcome == autopilot_core::ClaimOutcome::Denied
                    && matches!(s.decided_at, Some(d) if d >= since)
            })
            .count() as u64)
    }

    async fn get_baseline(
        &self,
        tenant_id: &str,
        payer: &str,
        procedure_code: &str,
    ) -> Result<Option<Baseline>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .baselines
            .get(&(
                tenant_id.to_string(),
                payer.to_string(),
                procedure_code.to_string(),
            ))
            .cloned())
    }

    async fn get_execution_log_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ExecutionLogRecord>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .execution_logs
            .iter()
            .find(|r| r.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn list_execution_logs(
        &self,
        tenant_id: &str,
        result: Option<ExecutionResult>,
        limit: usize,
    ) -> Result<Vec<ExecutionLogRecord>, StorageError> {
        let inner = self.lock();
        let mut rows: Vec<ExecutionLogRecord> = inner
            .execution_logs
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id && result.map_or(true, |want| r.result == want))
            .cloned()
            .collect();
        if limit > 0 {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn list_enabled_rules(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AutomationRule>, StorageError> {
        let inner = self.lock();
        let mut rules: Vec<AutomationRule> = inner
            .rules
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.enabled)
            .cloned()
            .collect();
        // Creation order; id as tiebreaker for determinism.
        rules.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(rules)
    }

    async fn list_authorizations(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AuthorizationRecord>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .authorizations
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationRecord, StorageError> {
        let inner = self.lock();
        inner
            .authorizations
            .get(authorization_id)
            .cloned()
            .ok_or_else(|| StorageError::AuthorizationNotFound {
                authorization_id: authorization_id.to_string(),
            })
    }

    async fn list_alerts(&self, tenant_id: &str) -> Result<Vec<AlertRecord>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_recent_alerts(
        &self,
        tenant_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<AlertRecord>, StorageError> {
        let inner = self.lock();
        let mut out = Vec::new();
        for a in inner.alerts.iter().filter(|a| {
            a.tenant_id == tenant_id && !a.suppressed
        }) {
            let created = OffsetDateTime::parse(
                &a.created_at,
                &time::format_description::well_known::Rfc3339,
            )
            .map_err(|e| StorageError::Backend(format!("bad created_at timestamp: {e}")))?;
            if created >= since {
                out.push(a.clone());
            }
        }
        Ok(out)
    }

    async fn network_signal_counts(
        &self,
        since: Date,
    ) -> Result<Vec<(String, u64, u64)>, StorageError> {
        let inner = self.lock();
        let mut by_payer: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for s in inner.signals.iter().filter(
            |s| matches!(s.decided_at, Some(d) if d.date() >= since),
        ) {
            let entry = by_payer.entry(s.payer.clone()).or_insert((0, 0));
            entry.1 += 1;
            if s.outcome == autopilot_core::ClaimOutcome::Denied {
                entry.0 += 1;
            }
        }
        Ok(by_payer
            .into_iter()
            .map(|(payer, (denied, total))| (payer, denied, total))
            .collect())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::ClaimOutcome;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn signal(tenant: &str, payer: &str, code: &str, outcome: ClaimOutcome) -> Signal {
        Signal {
            tenant_id: tenant.to_string(),
            payer: payer.to_string(),
            procedure_code: code.to_string(),
            outcome,
            amount: Decimal::new(12500, 2),
            submitted_at: datetime!(2026-08-01 00:00:00 UTC),
            decided_at: Some(datetime!(2026-08-10 00:00:00 UTC)),
        }
    }

    fn log_entry(id: &str, key: &str) -> ExecutionLogRecord {
        ExecutionLogRecord {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            rule_id: Some("r1".to_string()),
            trigger_event: serde_json::json!({}),
            action_taken: "hold_claim".to_string(),
            result: ExecutionResult::Success,
            details: String::new(),
            confirmation_id: Some("conf-1".to_string()),
            idempotency_key: key.to_string(),
            execution_time_ms: 5,
            executed_at: "2026-08-10T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn uncommitted_snapshot_is_invisible() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_signal(&mut snap, signal("t1", "BCBS", "99213", ClaimOutcome::Denied))
            .await
            .unwrap();
        // Dropped without commit
        drop(snap);
        assert!(storage.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_signal(&mut snap, signal("t1", "BCBS", "99213", ClaimOutcome::Denied))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        assert_eq!(storage.list_tenants().await.unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_rejected_at_commit() {
        let storage = MemoryStorage::new();

        let mut s1 = storage.begin_snapshot().await.unwrap();
        storage
            .insert_execution_log(&mut s1, log_entry("e1", "key-1"))
            .await
            .unwrap();
        storage.commit_snapshot(s1).await.unwrap();

        let mut s2 = storage.begin_snapshot().await.unwrap();
        storage
            .insert_execution_log(&mut s2, log_entry("e2", "key-1"))
            .await
            .unwrap();
        let err = storage.commit_snapshot(s2).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateIdempotencyKey { .. }));

        // Losing commit applied nothing
        let logs = storage.list_execution_logs("t1", None, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, "e1");
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let storage = MemoryStorage::new();

        let mut s1 = storage.begin_snapshot().await.unwrap();
        storage
            .insert_execution_log(&mut s1, log_entry("e1", "key-1"))
            .await
            .unwrap();
        storage.commit_snapshot(s1).await.unwrap();

        // Snapshot with one valid signal and one conflicting log entry:
        // neither lands.
        let mut s2 = storage.begin_snapshot().await.unwrap();
        storage
            .insert_signal(&mut s2, signal("t9", "Aetna", "99214", ClaimOutcome::Paid))
            .await
            .unwrap();
        storage
            .insert_execution_log(&mut s2, log_entry("e2", "key-1"))
            .await
            .unwrap();
        assert!(storage.commit_snapshot(s2).await.is_err());
        assert!(storage.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn occ_version_conflict() {
        let storage = MemoryStorage::new();
        let auth = AuthorizationRecord {
            id: "auth-1".to_string(),
            tenant_id: "t1".to_string(),
            payer: "BCBS".to_string(),
            procedure_code: "99213".to_string(),
            status: AuthorizationStatus::Active,
            auth_expiration_date: time::macros::date!(2026 - 09 - 15),
            reauth_lead_time_days: 30,
            auto_reauth_enabled: true,
            version: 0,
        };
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.put_authorization(&mut snap, auth).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let mut s1 = storage.begin_snapshot().await.unwrap();
        let v = storage
            .update_authorization_status(&mut s1, "auth-1", 0, AuthorizationStatus::RenewalRequested)
            .await
            .unwrap();
        assert_eq!(v, 1);
        storage.commit_snapshot(s1).await.unwrap();

        // Stale expected version
        let mut s2 = storage.begin_snapshot().await.unwrap();
        let err = storage
            .update_authorization_status(&mut s2, "auth-1", 0, AuthorizationStatus::Expired)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn alert_dedupe_by_log_entry() {
        let storage = MemoryStorage::new();
        let alert = AlertRecord {
            id: "a1".to_string(),
            tenant_id: "t1".to_string(),
            severity: crate::record::Severity::High,
            title: "action failed".to_string(),
            description: "portal rejected credentials".to_string(),
            evidence: serde_json::json!({}),
            execution_log_id: "e1".to_string(),
            suppressed: false,
            created_at: "2026-08-10T00:00:00Z".to_string(),
        };
        let mut s1 = storage.begin_snapshot().await.unwrap();
        storage.insert_alert(&mut s1, alert.clone()).await.unwrap();
        storage.commit_snapshot(s1).await.unwrap();

        let mut s2 = storage.begin_snapshot().await.unwrap();
        let mut dup = alert;
        dup.id = "a2".to_string();
        storage.insert_alert(&mut s2, dup).await.unwrap();
        let err = storage.commit_snapshot(s2).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateAlert { .. }));
    }
}
