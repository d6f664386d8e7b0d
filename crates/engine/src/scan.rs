//! Authorization expiry scanner.
//!
//! Calendar-driven trigger source: authorizations inside their renewal
//! lead time become `Calendar` trigger events. Event identity is stable
//! per (authorization, day), so re-running the scan the same day produces
//! identical events and the idempotency key deduplicates any resulting
//! actions downstream.

use std::collections::BTreeMap;

use autopilot_core::{TriggerEvent, TriggerKind};
use autopilot_storage::{AuthorizationStatus, EngineStorage, StorageError};
use time::{Date, OffsetDateTime};
use tracing::info;

pub struct ExpiryScanner<S> {
    storage: S,
}

impl<S: EngineStorage> ExpiryScanner<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Scan one tenant's authorizations as of `today`.
    pub async fn scan_tenant(
        &self,
        tenant_id: &str,
        today: Date,
        now: OffsetDateTime,
    ) -> Result<Vec<TriggerEvent>, StorageError> {
        let mut events = Vec::new();
        for auth in self.storage.list_authorizations(tenant_id).await? {
            if !auth.auto_reauth_enabled || auth.status != AuthorizationStatus::Active {
                continue;
            }
            let days_until = (auth.auth_expiration_date - today).whole_days();
            if days_until > auth.reauth_lead_time_days {
                continue;
            }

            let mut payload: BTreeMap<String, serde_json::Value> = BTreeMap::new();
            payload.insert(
                "authorization_id".to_string(),
                serde_json::json!(auth.id),
            );
            payload.insert("payer".to_string(), serde_json::json!(auth.payer));
            payload.insert(
                "procedure_code".to_string(),
                serde_json::json!(auth.procedure_code),
            );
            payload.insert(
                "days_until_expiration".to_string(),
                serde_json::json!(days_until),
            );
            payload.insert(
                "expiration_date".to_string(),
                serde_json::json!(auth.auth_expiration_date.to_string()),
            );

            events.push(TriggerEvent {
                kind: TriggerKind::Calendar,
                tenant_id: tenant_id.to_string(),
                identity: TriggerEvent::auth_expiring_identity(&auth.id, today),
                payload,
                occurred_at: now,
            });
        }
        info!(tenant_id, events = events.len(), "expiry scan complete");
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_storage::{AuthorizationRecord, MemoryStorage};
    use time::macros::{date, datetime};

    const TODAY: Date = date!(2026 - 08 - 20);
    const NOW: OffsetDateTime = datetime!(2026-08-20 06:00:00 UTC);

    fn auth(id: &str, expires: Date, lead_days: i64, enabled: bool) -> AuthorizationRecord {
        AuthorizationRecord {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            payer: "BCBS".to_string(),
            procedure_code: "99213".to_string(),
            status: AuthorizationStatus::Active,
            auth_expiration_date: expires,
            reauth_lead_time_days: lead_days,
            auto_reauth_enabled: enabled,
            version: 0,
        }
    }

    async fn seed(storage: &MemoryStorage, records: Vec<AuthorizationRecord>) {
        let mut snap = storage.begin_snapshot().await.unwrap();
        for r in records {
            storage.put_authorization(&mut snap, r).await.unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();
    }

    #[tokio::test]
    async fn emits_event_inside_lead_time() {
        let storage = MemoryStorage::new();
        seed(
            &storage,
            vec![
                auth("auth-1", date!(2026 - 09 - 10), 30, true),
                auth("auth-2", date!(2027 - 01 - 01), 30, true),
            ],
        )
        .await;

        let scanner = ExpiryScanner::new(storage);
        let events = scanner.scan_tenant("t1", TODAY, NOW).await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, TriggerKind::Calendar);
        assert_eq!(event.identity, "auth_expiring:auth-1:2026-08-20");
        assert_eq!(event.payload["days_until_expiration"], serde_json::json!(21));
    }

    #[tokio::test]
    async fn disabled_and_non_active_are_skipped() {
        let storage = MemoryStorage::new();
        let mut renewal_pending = auth("auth-2", date!(2026 - 08 - 25), 30, true);
        renewal_pending.status = AuthorizationStatus::RenewalRequested;
        seed(
            &storage,
            vec![
                auth("auth-1", date!(2026 - 08 - 25), 30, false),
                renewal_pending,
            ],
        )
        .await;

        let scanner = ExpiryScanner::new(storage);
        assert!(scanner.scan_tenant("t1", TODAY, NOW).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescan_same_day_yields_identical_identity() {
        let storage = MemoryStorage::new();
        seed(&storage, vec![auth("auth-1", date!(2026 - 08 - 25), 30, true)]).await;

        let scanner = ExpiryScanner::new(storage);
        let first = scanner.scan_tenant("t1", TODAY, NOW).await.unwrap();
        let second = scanner.scan_tenant("t1", TODAY, NOW).await.unwrap();
        assert_eq!(first[0].identity, second[0].identity);
    }
}
