//! Nightly baseline calculator.
//!
//! Reads a tenant's decided signals over the lookback window, aggregates
//! denial rates per (payer, procedure_code) in memory, and commits the
//! whole tenant's baselines in one storage snapshot. A crash mid-batch
//! leaves no partial per-tenant state, and re-running over the same window
//! produces identical rows (upsert by key).

use std::collections::BTreeMap;

use autopilot_core::Baseline;
use autopilot_storage::{EngineStorage, StorageError};
use time::{Duration, OffsetDateTime};
use tracing::info;

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Lookback window in days.
    pub lookback_days: i64,
    /// Pairs with fewer decided signals than this are pruned, not written.
    pub min_sample: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            min_sample: 5,
        }
    }
}

/// Per-run totals, for operational logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineRunSummary {
    pub tenants: usize,
    pub baselines_written: usize,
    pub pairs_pruned: usize,
}

pub struct BaselineCalculator<S> {
    storage: S,
    config: BaselineConfig,
}

impl<S: EngineStorage> BaselineCalculator<S> {
    pub fn new(storage: S, config: BaselineConfig) -> Self {
        Self { storage, config }
    }

    /// Recompute baselines for every known tenant. Each tenant is one
    /// atomic commit; a failure on one tenant aborts the run.
    pub async fn run(&self, now: OffsetDateTime) -> Result<BaselineRunSummary, StorageError> {
        let mut summary = BaselineRunSummary::default();
        for tenant_id in self.storage.list_tenants().await? {
            let (written, pruned) = self.run_tenant(&tenant_id, now).await?;
            summary.tenants += 1;
            summary.baselines_written += written;
            summary.pairs_pruned += pruned;
        }
        info!(
            tenants = summary.tenants,
            written = summary.baselines_written,
            pruned = summary.pairs_pruned,
            "baseline run complete"
        );
        Ok(summary)
    }

    /// Recompute one tenant's baselines. Returns (written, pruned) counts.
    pub async fn run_tenant(
        &self,
        tenant_id: &str,
        now: OffsetDateTime,
    ) -> Result<(usize, usize), StorageError> {
        let from = now - Duration::days(self.config.lookback_days);
        let signals = self
            .storage
            .list_decided_signals(tenant_id, from, now)
            .await?;

        // (payer, code) -> (denied, total)
        let mut counts: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for signal in &signals {
            let entry = counts
                .entry((signal.payer.clone(), signal.procedure_code.clone()))
                .or_insert((0, 0));
            entry.1 += 1;
            if signal.outcome == autopilot_core::ClaimOutcome::Denied {
                entry.0 += 1;
            }
        }

        let mut snapshot = self.storage.begin_snapshot().await?;
        let mut written = 0usize;
        let mut pruned = 0usize;
        for ((payer, procedure_code), (denied, total)) in counts {
            if total < self.config.min_sample {
                pruned += 1;
                continue;
            }
            let baseline = Baseline {
                tenant_id: tenant_id.to_string(),
                payer,
                procedure_code,
                denial_rate: denied as f64 / total as f64,
                sample_size: total,
                confidence: (total as f64 / 100.0).min(1.0),
                computed_at: now,
            };
            self.storage.upsert_baseline(&mut snapshot, baseline).await?;
            written += 1;
        }
        self.storage.commit_snapshot(snapshot).await?;

        info!(tenant_id, written, pruned, "tenant baselines committed");
        Ok((written, pruned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{ClaimOutcome, Signal};
    use autopilot_storage::MemoryStorage;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn signal(payer: &str, code: &str, outcome: ClaimOutcome) -> Signal {
        Signal {
            tenant_id: "t1".to_string(),
            payer: payer.to_string(),
            procedure_code: code.to_string(),
            outcome,
            amount: Decimal::new(10000, 2),
            submitted_at: datetime!(2026-08-01 00:00:00 UTC),
            decided_at: Some(datetime!(2026-08-10 00:00:00 UTC)),
        }
    }

    async fn seed(storage: &MemoryStorage, signals: Vec<Signal>) {
        let mut snap = storage.begin_snapshot().await.unwrap();
        for s in signals {
            storage.insert_signal(&mut snap, s).await.unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();
    }

    #[tokio::test]
    async fn computes_rate_and_confidence() {
        let storage = MemoryStorage::new();
        let mut signals = Vec::new();
        for i in 0..10 {
            let outcome = if i < 3 {
                ClaimOutcome::Denied
            } else {
                ClaimOutcome::Paid
            };
            signals.push(signal("BCBS", "99213", outcome));
        }
        seed(&storage, signals).await;

        let calc = BaselineCalculator::new(storage.clone(), BaselineConfig::default());
        let now = datetime!(2026-08-20 00:00:00 UTC);
        let (written, pruned) = calc.run_tenant("t1", now).await.unwrap();
        assert_eq!((written, pruned), (1, 0));

        let b = storage
            .get_baseline("t1", "BCBS", "99213")
            .await
            .unwrap()
            .unwrap();
        assert!((b.denial_rate - 0.3).abs() < 1e-12);
        assert_eq!(b.sample_size, 10);
        assert!((b.confidence - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn small_samples_are_pruned_not_written() {
        let storage = MemoryStorage::new();
        seed(
            &storage,
            vec![
                signal("Aetna", "99214", ClaimOutcome::Denied),
                signal("Aetna", "99214", ClaimOutcome::Denied),
                signal("Aetna", "99214", ClaimOutcome::Paid),
            ],
        )
        .await;

        let calc = BaselineCalculator::new(storage.clone(), BaselineConfig::default());
        let (written, pruned) = calc
            .run_tenant("t1", datetime!(2026-08-20 00:00:00 UTC))
            .await
            .unwrap();
        assert_eq!((written, pruned), (0, 1));
        assert!(storage
            .get_baseline("t1", "Aetna", "99214")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rerun_is_identical() {
        let storage = MemoryStorage::new();
        let mut signals = Vec::new();
        for _ in 0..5 {
            signals.push(signal("UHC", "99215", ClaimOutcome::Denied));
        }
        seed(&storage, signals).await;

        let calc = BaselineCalculator::new(storage.clone(), BaselineConfig::default());
        let now = datetime!(2026-08-20 00:00:00 UTC);
        calc.run_tenant("t1", now).await.unwrap();
        let first = storage.get_baseline("t1", "UHC", "99215").await.unwrap();
        calc.run_tenant("t1", now).await.unwrap();
        let second = storage.get_baseline("t1", "UHC", "99215").await.unwrap();
        assert_eq!(first, second);
    }
}
