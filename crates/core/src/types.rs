//! Domain types shared across the engine.
//!
//! Signals are immutable observed facts; baselines are precomputed
//! per-(tenant, payer, code) references; everything downstream of the
//! detector is transient until it lands in the execution log.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Outcome of a decided (or still pending) claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Paid,
    Denied,
    Pending,
}

impl ClaimOutcome {
    pub fn is_decided(self) -> bool {
        !matches!(self, ClaimOutcome::Pending)
    }
}

/// An immutable observed claim/payment fact.
///
/// Owned by the ingestion path; read-only to the engine. Never mutated
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub tenant_id: String,
    pub payer: String,
    pub procedure_code: String,
    pub outcome: ClaimOutcome,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub decided_at: Option<OffsetDateTime>,
}

/// Precomputed historical denial-rate reference per (tenant, payer, code).
///
/// One row per key, upsert semantics. Pairs with fewer than five decided
/// signals are pruned by the calculator rather than written -- a missing
/// baseline means "insufficient data", not "zero risk".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub tenant_id: String,
    pub payer: String,
    pub procedure_code: String,
    /// Fraction of decided signals that were denied, in [0, 1].
    pub denial_rate: f64,
    pub sample_size: u64,
    /// min(sample_size / 100, 1.0) -- monotonic in sample size.
    pub confidence: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

/// A statistically-significant detected shift from baseline.
///
/// Derived and ephemeral: created by the detector, consumed once by the
/// rule evaluator, persisted only through the audit trail it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorChangeEvent {
    pub tenant_id: String,
    pub payer: String,
    pub baseline_rate: f64,
    pub current_rate: f64,
    pub p_value: f64,
    /// Relative rate change, absent when baseline_rate is zero.
    pub relative_change: Option<f64>,
    /// Distinct procedure codes among recently denied signals.
    pub affected_codes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
}

/// The kind of side effect an action performs against the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SubmitReauthRequest,
    GenerateAppeal,
    HoldClaim,
    SubmitPortalForm,
    NotifyOnly,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::SubmitReauthRequest => "submit_reauth_request",
            ActionType::GenerateAppeal => "generate_appeal",
            ActionType::HoldClaim => "hold_claim",
            ActionType::SubmitPortalForm => "submit_portal_form",
            ActionType::NotifyOnly => "notify_only",
        }
    }
}

/// An inbound event the rule evaluator matches against tenant rules.
///
/// `identity` is stable for logically-identical events: two scans that
/// notice the same expiring authorization on the same day carry the same
/// identity, which is what makes the idempotency key deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: crate::rule::TriggerKind,
    pub tenant_id: String,
    pub identity: String,
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl TriggerEvent {
    /// Build the identity for a calendar-driven authorization scan event.
    /// Stable within a day so repeated scans deduplicate.
    pub fn auth_expiring_identity(authorization_id: &str, on: Date) -> String {
        format!("auth_expiring:{}:{}", authorization_id, on)
    }

    /// Build the identity for a detected behavior shift.
    pub fn behavior_shift_identity(payer: &str, detected_on: Date) -> String {
        format!("behavior_shift:{}:{}", payer, detected_on)
    }
}

/// Entity types locks can be taken on, in the single fixed global order.
///
/// The declaration order here IS the lock acquisition order: Customer
/// before signal-derived entities before rules before action targets.
/// `Ord` on this enum plus `canonical_lock_order` in the engine crate is
/// the one place lock ordering is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Customer,
    SignalEntity,
    Rule,
    ActionTarget,
}

/// A lockable entity reference: kind plus primary key.
///
/// Derived `Ord` sorts by kind first (the global type order), then by key
/// ascending within a type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub kind: LockKind,
    pub id: String,
}

impl LockKey {
    pub fn new(kind: LockKind, id: impl Into<String>) -> Self {
        LockKey {
            kind,
            id: id.into(),
        }
    }
}

/// One candidate unit of autonomous work matched from an event+rule pair.
///
/// Transient: exists only within one evaluation pass. Rule configuration
/// that the coordinator needs later (`escalate_on_error`) is captured here
/// at evaluation time; the coordinator never re-reads the rule mid-flight,
/// so a rule edited or disabled after matching cannot change the handling
/// of an action already in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub rule_id: String,
    pub tenant_id: String,
    pub action_type: ActionType,
    pub params: BTreeMap<String, serde_json::Value>,
    pub event: TriggerEvent,
    pub target_entity_ids: Vec<String>,
    pub lock_keys: Vec<LockKey>,
    /// Snapshot of the matching rule's `escalate_on_error` flag.
    pub escalate_on_error: bool,
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn lock_kind_order_is_the_global_order() {
        assert!(LockKind::Customer < LockKind::SignalEntity);
        assert!(LockKind::SignalEntity < LockKind::Rule);
        assert!(LockKind::Rule < LockKind::ActionTarget);
    }

    #[test]
    fn lock_keys_sort_by_kind_then_id() {
        let mut keys = vec![
            LockKey::new(LockKind::Rule, "r1"),
            LockKey::new(LockKind::Customer, "t2"),
            LockKey::new(LockKind::Customer, "t1"),
            LockKey::new(LockKind::SignalEntity, "auth-9"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                LockKey::new(LockKind::Customer, "t1"),
                LockKey::new(LockKind::Customer, "t2"),
                LockKey::new(LockKind::SignalEntity, "auth-9"),
                LockKey::new(LockKind::Rule, "r1"),
            ]
        );
    }

    #[test]
    fn calendar_identity_is_stable_within_a_day() {
        let a = TriggerEvent::auth_expiring_identity("auth-1", date!(2026 - 08 - 25));
        let b = TriggerEvent::auth_expiring_identity("auth-1", date!(2026 - 08 - 25));
        assert_eq!(a, b);
        let c = TriggerEvent::auth_expiring_identity("auth-1", date!(2026 - 08 - 26));
        assert_ne!(a, c);
    }

    #[test]
    fn outcome_decided() {
        assert!(ClaimOutcome::Paid.is_decided());
        assert!(ClaimOutcome::Denied.is_decided());
        assert!(!ClaimOutcome::Pending.is_decided());
    }
}
