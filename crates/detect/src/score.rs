//! Pre-submission claim risk scoring.
//!
//! Five weighted factors produce a 0-100 score with a per-factor
//! breakdown. Every lookup is a point read: one baseline fetch, one
//! denial-streak count, and indexed map lookups against the coding rules.
//! The recommendation text is assembled mechanically from whichever
//! factors fired; there is no free-form generation.

use std::collections::{BTreeMap, BTreeSet};

use autopilot_storage::{EngineStorage, StorageError};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// A claim as drafted, before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDraft {
    pub tenant_id: String,
    pub payer: String,
    pub procedure_code: String,
    pub modifiers: Vec<String>,
    pub diagnosis_codes: Vec<String>,
    pub has_prior_auth: bool,
}

/// Static coding reference tables, keyed by procedure code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodingRules {
    /// Modifiers the code is expected to carry.
    pub required_modifiers: BTreeMap<String, Vec<String>>,
    /// Diagnosis-code prefixes that support the procedure. A code with an
    /// entry here and no matching diagnosis on the draft is a mismatch.
    pub supporting_diagnosis_prefixes: BTreeMap<String, Vec<String>>,
    /// Codes that require prior authorization.
    pub prior_auth_required: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ScorerWeights {
    pub historical_rate: f64,
    pub missing_modifiers: f64,
    pub denial_streak: f64,
    pub diagnosis_mismatch: f64,
    pub missing_prior_auth: f64,
    /// Flat raw value charged against the historical weight when baseline
    /// confidence is below the gate.
    pub insufficient_history_penalty: f64,
    /// Minimum baseline confidence for the historical rate to count.
    pub confidence_gate: f64,
    /// Denials at or above this count in the trailing window fire the
    /// streak factor.
    pub streak_threshold: u64,
    pub streak_days: i64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            historical_rate: 0.40,
            missing_modifiers: 0.20,
            denial_streak: 0.20,
            diagnosis_mismatch: 0.10,
            missing_prior_auth: 0.10,
            insufficient_history_penalty: 0.25,
            confidence_gate: 0.5,
            streak_threshold: 2,
            streak_days: 30,
        }
    }
}

/// One factor's contribution to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Raw factor value in [0, 1] before weighting.
    pub raw_value: f64,
    pub weight: f64,
    /// `raw_value * weight * 100`, the points added to the score.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Clamped to [0, 100].
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

pub struct RiskScorer<S> {
    storage: S,
    rules: CodingRules,
    weights: ScorerWeights,
}

impl<S: EngineStorage> RiskScorer<S> {
    pub fn new(storage: S, rules: CodingRules, weights: ScorerWeights) -> Self {
        Self {
            storage,
            rules,
            weights,
        }
    }

    pub async fn score(
        &self,
        draft: &ClaimDraft,
        now: OffsetDateTime,
    ) -> Result<RiskScore, StorageError> {
        let mut factors = Vec::new();
        let mut recommendations = Vec::new();

        // Historical denial rate, gated on baseline confidence. A thin or
        // missing baseline charges a flat penalty instead of treating the
        // pair as risk-free.
        let baseline = self
            .storage
            .get_baseline(&draft.tenant_id, &draft.payer, &draft.procedure_code)
            .await?;
        match baseline {
            Some(b) if b.confidence >= self.weights.confidence_gate => {
                factors.push(factor(
                    "historical_denial_rate",
                    b.denial_rate,
                    self.weights.historical_rate,
                ));
                if b.denial_rate >= 0.3 {
                    recommendations.push(format!(
                        "{} denies {:.0}% of {} claims; review before submitting",
                        draft.payer,
                        b.denial_rate * 100.0,
                        draft.procedure_code
                    ));
                }
            }
            _ => {
                factors.push(factor(
                    "insufficient_history",
                    self.weights.insufficient_history_penalty,
                    self.weights.historical_rate,
                ));
            }
        }

        // Missing required modifiers. All-or-nothing: any missing required
        // modifier charges the full weight, though each one gets its own
        // recommendation line.
        if let Some(required) = self.rules.required_modifiers.get(&draft.procedure_code) {
            let missing: Vec<&String> = required
                .iter()
                .filter(|m| !draft.modifiers.contains(m))
                .collect();
            if !missing.is_empty() {
                factors.push(factor("missing_modifiers", 1.0, self.weights.missing_modifiers));
                for m in missing {
                    recommendations.push(format!(
                        "add modifier {} required for {}",
                        m, draft.procedure_code
                    ));
                }
            }
        }

        // Recent denial streak for this payer.
        let since = now - Duration::days(self.weights.streak_days);
        let recent_denials = self
            .storage
            .count_denials_since(&draft.tenant_id, &draft.payer, since)
            .await?;
        if recent_denials >= self.weights.streak_threshold {
            factors.push(factor("denial_streak", 1.0, self.weights.denial_streak));
            recommendations.push(format!(
                "{} has denied {} claims in the last {} days",
                draft.payer, recent_denials, self.weights.streak_days
            ));
        }

        // Diagnosis support for the procedure code.
        if let Some(prefixes) = self
            .rules
            .supporting_diagnosis_prefixes
            .get(&draft.procedure_code)
        {
            let supported = draft
                .diagnosis_codes
                .iter()
                .any(|dx| prefixes.iter().any(|p| dx.starts_with(p.as_str())));
            if !supported {
                factors.push(factor(
                    "diagnosis_mismatch",
                    1.0,
                    self.weights.diagnosis_mismatch,
                ));
                recommendations.push(format!(
                    "no diagnosis on the claim supports {}",
                    draft.procedure_code
                ));
            }
        }

        // Prior authorization requirement.
        if self.rules.prior_auth_required.contains(&draft.procedure_code)
            && !draft.has_prior_auth
        {
            factors.push(factor(
                "missing_prior_auth",
                1.0,
                self.weights.missing_prior_auth,
            ));
            recommendations.push(format!(
                "{} requires prior authorization and none is attached",
                draft.procedure_code
            ));
        }

        let score = factors
            .iter()
            .map(|f| f.contribution)
            .sum::<f64>()
            .clamp(0.0, 100.0);
        debug!(
            tenant_id = %draft.tenant_id,
            payer = %draft.payer,
            procedure_code = %draft.procedure_code,
            score,
            "claim scored"
        );
        Ok(RiskScore {
            score,
            factors,
            recommendations,
        })
    }
}

fn factor(name: &str, raw_value: f64, weight: f64) -> RiskFactor {
    RiskFactor {
        name: name.to_string(),
        raw_value,
        weight,
        contribution: raw_value * weight * 100.0,
    }
}
