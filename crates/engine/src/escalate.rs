//! Escalation routing: failed autonomous work becomes human-facing alerts.
//!
//! Every FAILED or ESCALATED execution-log entry produces at most one
//! alert, keyed by the log entry's id (uniqueness enforced by the storage
//! backend). Duplicate deliveries for the same logical condition within
//! the cooldown window are recorded but marked suppressed; a failure is
//! never silently dropped.

use std::time::Duration;

use autopilot_storage::{
    AlertRecord, EngineStorage, ExecutionLogRecord, ExecutionResult, Severity, StorageError,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Window during which a second alert for the same
    /// (tenant, signal type, entity) is suppressed.
    pub cooldown: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(4 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationRouter {
    config: RouterConfig,
}

impl EscalationRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Route one terminal log entry into an alert. Returns `None` when the
    /// entry was already routed (idempotent per entry id) or is not a
    /// failure at all.
    pub async fn route<S: EngineStorage>(
        &self,
        storage: &S,
        entry: &ExecutionLogRecord,
        now: OffsetDateTime,
    ) -> Result<Option<AlertRecord>, StorageError> {
        let severity = match entry.result {
            ExecutionResult::Escalated => Severity::High,
            ExecutionResult::Failed => Severity::Medium,
            ExecutionResult::Success => return Ok(None),
        };

        let entity_label = entry
            .trigger_event
            .get("identity")
            .and_then(|v| v.as_str())
            .unwrap_or(&entry.id)
            .to_string();
        let suppressed = self
            .recently_alerted(storage, &entry.tenant_id, &entry.action_taken, &entity_label, now)
            .await?;

        let alert = AlertRecord {
            id: generate_id(),
            tenant_id: entry.tenant_id.clone(),
            severity,
            title: format!("automated {} did not complete", entry.action_taken),
            description: entry.details.clone(),
            evidence: serde_json::json!({
                "signal_type": entry.action_taken,
                "entity_label": entity_label,
                "rule_id": entry.rule_id,
                "result": entry.result,
                "trigger_event": entry.trigger_event,
            }),
            execution_log_id: entry.id.clone(),
            suppressed,
            created_at: rfc3339(now)?,
        };

        let mut snapshot = storage.begin_snapshot().await?;
        storage.insert_alert(&mut snapshot, alert.clone()).await?;
        match storage.commit_snapshot(snapshot).await {
            Ok(()) => {
                info!(
                    tenant_id = %alert.tenant_id,
                    execution_log_id = %alert.execution_log_id,
                    severity = ?alert.severity,
                    suppressed,
                    "alert routed"
                );
                Ok(Some(alert))
            }
            // Another worker already routed this entry.
            Err(StorageError::DuplicateAlert { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sweep a tenant's terminal entries and route any that have no alert
    /// yet. Safe to run repeatedly.
    pub async fn route_pending<S: EngineStorage>(
        &self,
        storage: &S,
        tenant_id: &str,
        now: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        let mut routed = 0;
        for result in [ExecutionResult::Failed, ExecutionResult::Escalated] {
            for entry in storage.list_execution_logs(tenant_id, Some(result), 0).await? {
                if self.route(storage, &entry, now).await?.is_some() {
                    routed += 1;
                }
            }
        }
        Ok(routed)
    }

    /// Has a non-suppressed alert for the same logical condition been
    /// delivered within the cooldown window?
    async fn recently_alerted<S: EngineStorage>(
        &self,
        storage: &S,
        tenant_id: &str,
        signal_type: &str,
        entity_label: &str,
        now: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        let since = now - time::Duration::seconds(self.config.cooldown.as_secs() as i64);
        let recent = storage.list_recent_alerts(tenant_id, since).await?;
        Ok(recent.iter().any(|a| {
            a.evidence.get("signal_type").and_then(|v| v.as_str()) == Some(signal_type)
                && a.evidence.get("entity_label").and_then(|v| v.as_str()) == Some(entity_label)
        }))
    }
}

fn generate_id() -> String {
    format!("alert-{:032x}", rand::random::<u128>())
}

fn rfc3339(ts: OffsetDateTime) -> Result<String, StorageError> {
    ts.format(&Rfc3339)
        .map_err(|e| StorageError::Backend(format!("timestamp format: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_storage::MemoryStorage;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-08-20 12:00:00 UTC);

    fn entry(id: &str, result: ExecutionResult, identity: &str) -> ExecutionLogRecord {
        ExecutionLogRecord {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            rule_id: Some("r1".to_string()),
            trigger_event: serde_json::json!({"identity": identity}),
            action_taken: "submit_reauth_request".to_string(),
            result,
            details: "portal unavailable after 3 attempts".to_string(),
            confirmation_id: None,
            idempotency_key: format!("key-{id}"),
            execution_time_ms: 900,
            executed_at: "2026-08-20T11:59:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn escalated_entry_becomes_high_severity_alert() {
        let storage = MemoryStorage::new();
        let router = EscalationRouter::default();
        let alert = router
            .route(&storage, &entry("e1", ExecutionResult::Escalated, "auth_expiring:a1:2026-08-20"), NOW)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert!(!alert.suppressed);
        assert_eq!(storage.list_alerts("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn routing_same_entry_twice_is_idempotent() {
        let storage = MemoryStorage::new();
        let router = EscalationRouter::default();
        let e = entry("e1", ExecutionResult::Failed, "id-1");
        assert!(router.route(&storage, &e, NOW).await.unwrap().is_some());
        assert!(router.route(&storage, &e, NOW).await.unwrap().is_none());
        assert_eq!(storage.list_alerts("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_entries_are_not_routed() {
        let storage = MemoryStorage::new();
        let router = EscalationRouter::default();
        let e = entry("e1", ExecutionResult::Success, "id-1");
        assert!(router.route(&storage, &e, NOW).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_alert_in_cooldown_is_recorded_suppressed() {
        let storage = MemoryStorage::new();
        let router = EscalationRouter::default();
        // Same logical condition, distinct log entries an hour apart.
        router
            .route(&storage, &entry("e1", ExecutionResult::Failed, "id-1"), NOW)
            .await
            .unwrap();
        let second = router
            .route(
                &storage,
                &entry("e2", ExecutionResult::Failed, "id-1"),
                NOW + time::Duration::hours(1),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(second.suppressed);
        // Recorded, not dropped.
        assert_eq!(storage.list_alerts("t1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_expires_after_window() {
        let storage = MemoryStorage::new();
        let router = EscalationRouter::default();
        router
            .route(&storage, &entry("e1", ExecutionResult::Failed, "id-1"), NOW)
            .await
            .unwrap();
        let later = router
            .route(
                &storage,
                &entry("e2", ExecutionResult::Failed, "id-1"),
                NOW + time::Duration::hours(5),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!later.suppressed);
    }

    #[tokio::test]
    async fn route_pending_sweeps_terminal_entries() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        for (id, result) in [
            ("e1", ExecutionResult::Failed),
            ("e2", ExecutionResult::Escalated),
            ("e3", ExecutionResult::Success),
        ] {
            storage
                .insert_execution_log(&mut snap, entry(id, result, id))
                .await
                .unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();

        let router = EscalationRouter::default();
        let routed = router.route_pending(&storage, "t1", NOW).await.unwrap();
        assert_eq!(routed, 2);
        // Second sweep finds nothing new.
        assert_eq!(router.route_pending(&storage, "t1", NOW).await.unwrap(), 0);
    }
}
