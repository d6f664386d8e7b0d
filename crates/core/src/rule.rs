//! Tenant-configured automation rules.
//!
//! Rules are mutated only by tenant administrators through an external
//! management surface; the engine reads enabled rules as an immutable
//! snapshot at the start of each evaluation pass and never re-fetches
//! mid-flight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::predicate::Predicate;
use crate::types::ActionType;

/// The event class a rule listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    BehaviorShift,
    RiskScore,
    Calendar,
}

/// A pre-approved trigger → condition → action mapping owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub trigger: TriggerKind,
    pub condition: Predicate,
    pub action_type: ActionType,
    pub action_params: BTreeMap<String, serde_json::Value>,
    pub enabled: bool,
    pub escalate_on_error: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
