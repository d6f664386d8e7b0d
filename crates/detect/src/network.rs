//! Cross-tenant network view.
//!
//! A read-only aggregation over the whole signal store: per-payer denial
//! stats across every tenant, refreshed on demand. It shares no locks and
//! no snapshots with the per-tenant execution path; a slow refresh can
//! never stall the coordinator.

use autopilot_storage::{EngineStorage, StorageError};
use serde::{Deserialize, Serialize};
use time::Date;
use tracing::info;

/// One payer's aggregate denial behavior across all tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerNetworkStats {
    pub payer: String,
    pub denied: u64,
    pub total: u64,
    pub denial_rate: f64,
}

pub struct NetworkView<S> {
    storage: S,
}

impl<S: EngineStorage> NetworkView<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Recompute the view over decisions on or after `since`, highest
    /// denial rate first.
    pub async fn refresh(&self, since: Date) -> Result<Vec<PayerNetworkStats>, StorageError> {
        let counts = self.storage.network_signal_counts(since).await?;
        let mut stats: Vec<PayerNetworkStats> = counts
            .into_iter()
            .filter(|(_, _, total)| *total > 0)
            .map(|(payer, denied, total)| PayerNetworkStats {
                payer,
                denied,
                total,
                denial_rate: denied as f64 / total as f64,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.denial_rate
                .partial_cmp(&a.denial_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payer.cmp(&b.payer))
        });
        info!(payers = stats.len(), "network view refreshed");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{ClaimOutcome, Signal};
    use autopilot_storage::MemoryStorage;
    use rust_decimal::Decimal;
    use time::macros::{date, datetime};

    fn signal(tenant: &str, payer: &str, outcome: ClaimOutcome) -> Signal {
        Signal {
            tenant_id: tenant.to_string(),
            payer: payer.to_string(),
            procedure_code: "99213".to_string(),
            outcome,
            amount: Decimal::new(10000, 2),
            submitted_at: datetime!(2026-08-01 00:00:00 UTC),
            decided_at: Some(datetime!(2026-08-15 00:00:00 UTC)),
        }
    }

    #[tokio::test]
    async fn aggregates_across_tenants() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        // BCBS: 2 denied of 3 across two tenants. Aetna: 0 of 1.
        for s in [
            signal("t1", "BCBS", ClaimOutcome::Denied),
            signal("t2", "BCBS", ClaimOutcome::Denied),
            signal("t2", "BCBS", ClaimOutcome::Paid),
            signal("t1", "Aetna", ClaimOutcome::Paid),
        ] {
            storage.insert_signal(&mut snap, s).await.unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();

        let view = NetworkView::new(storage);
        let stats = view.refresh(date!(2026 - 08 - 01)).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].payer, "BCBS");
        assert_eq!((stats[0].denied, stats[0].total), (2, 3));
        assert_eq!(stats[1].payer, "Aetna");
    }

    #[tokio::test]
    async fn respects_the_since_cutoff() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_signal(&mut snap, signal("t1", "BCBS", ClaimOutcome::Denied))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let view = NetworkView::new(storage);
        let stats = view.refresh(date!(2026 - 08 - 16)).await.unwrap();
        assert!(stats.is_empty());
    }
}
