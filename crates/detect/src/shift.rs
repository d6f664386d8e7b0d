//! Behavior-shift detector.
//!
//! Compares a payer's recent denial rate against the immediately preceding
//! baseline window with a Pearson chi-square test. Emits a
//! `BehaviorChangeEvent` only when the shift is both statistically
//! significant and practically large, in either direction; noisy
//! small-sample windows produce nothing at all.

use std::collections::BTreeSet;

use autopilot_core::BehaviorChangeEvent;
use autopilot_storage::{EngineStorage, StorageError};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::stats;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Recent comparison window in days.
    pub recent_days: i64,
    /// Baseline window in days, ending where the recent window starts.
    pub baseline_days: i64,
    /// Minimum decided signals required in EACH window.
    pub min_window: u64,
    /// Significance threshold on the chi-square p-value.
    pub p_threshold: f64,
    /// Minimum magnitude of the relative rate change (absolute change
    /// when the baseline rate is zero).
    pub change_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            recent_days: 3,
            baseline_days: 14,
            min_window: 10,
            p_threshold: 0.05,
            change_threshold: 0.10,
        }
    }
}

pub struct ShiftDetector<S> {
    storage: S,
    config: DetectorConfig,
}

impl<S: EngineStorage> ShiftDetector<S> {
    pub fn new(storage: S, config: DetectorConfig) -> Self {
        Self { storage, config }
    }

    /// Check one (tenant, payer) pair. Returns an event only when every
    /// gate passes; any insufficiency means `None`, never an error.
    pub async fn detect(
        &self,
        tenant_id: &str,
        payer: &str,
        now: OffsetDateTime,
    ) -> Result<Option<BehaviorChangeEvent>, StorageError> {
        let recent_start = now - Duration::days(self.config.recent_days);
        let baseline_start = recent_start - Duration::days(self.config.baseline_days);

        let (recent_denied, recent_total) = self
            .storage
            .signal_counts(tenant_id, payer, recent_start, now)
            .await?;
        let (base_denied, base_total) = self
            .storage
            .signal_counts(tenant_id, payer, baseline_start, recent_start)
            .await?;

        if recent_total < self.config.min_window || base_total < self.config.min_window {
            debug!(
                tenant_id,
                payer, recent_total, base_total, "window below minimum, no signal"
            );
            return Ok(None);
        }

        let current_rate = recent_denied as f64 / recent_total as f64;
        let baseline_rate = base_denied as f64 / base_total as f64;

        let chi2 = match stats::chi_square_2x2(
            recent_denied,
            recent_total - recent_denied,
            base_denied,
            base_total - base_denied,
        ) {
            Some(chi2) => chi2,
            None => return Ok(None),
        };
        let p_value = stats::chi_square_p_value(chi2);
        if p_value >= self.config.p_threshold {
            debug!(tenant_id, payer, p_value, "not significant");
            return Ok(None);
        }

        // Relative change is undefined against a zero baseline; fall back
        // to the absolute change and leave the relative field empty.
        let relative_change = if baseline_rate > 0.0 {
            Some((current_rate - baseline_rate) / baseline_rate)
        } else {
            None
        };
        // The threshold is on the magnitude of the change: a payer whose
        // denial rate collapses is as much a behavior shift as one whose
        // rate spikes.
        let large_enough = match relative_change {
            Some(rel) => rel.abs() > self.config.change_threshold,
            None => (current_rate - baseline_rate).abs() > self.config.change_threshold,
        };
        if !large_enough {
            debug!(
                tenant_id,
                payer, baseline_rate, current_rate, "significant but small, suppressed"
            );
            return Ok(None);
        }

        let affected_codes = self
            .storage
            .denied_codes(tenant_id, payer, recent_start, now)
            .await?;

        info!(
            tenant_id,
            payer, baseline_rate, current_rate, p_value, "behavior shift detected"
        );
        Ok(Some(BehaviorChangeEvent {
            tenant_id: tenant_id.to_string(),
            payer: payer.to_string(),
            baseline_rate,
            current_rate,
            p_value,
            relative_change,
            affected_codes,
            detected_at: now,
        }))
    }

    /// Check every payer a tenant has decided signals for across the
    /// combined window.
    pub async fn scan_tenant(
        &self,
        tenant_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<BehaviorChangeEvent>, StorageError> {
        let window_start =
            now - Duration::days(self.config.recent_days + self.config.baseline_days);
        let payers: BTreeSet<String> = self
            .storage
            .list_decided_signals(tenant_id, window_start, now)
            .await?
            .into_iter()
            .map(|s| s.payer)
            .collect();

        let mut events = Vec::new();
        for payer in payers {
            if let Some(event) = self.detect(tenant_id, &payer, now).await? {
                events.push(event);
            }
        }
        Ok(events)
    }
}
