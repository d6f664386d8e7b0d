use serde::{Deserialize, Serialize};
use time::Date;

/// Terminal result of one coordinated action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    Success,
    Failed,
    Escalated,
}

/// An immutable audit record of one autonomous action attempt.
///
/// The durable record of "what the system did autonomously and why".
/// Exactly one row per committed attempt; `idempotency_key` is unique
/// (enforced by the backend at commit) and is what prevents duplicate
/// external side effects across retries and concurrent workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogRecord {
    pub id: String,
    pub tenant_id: String,
    /// None for engine-internal actions not driven by a tenant rule.
    pub rule_id: Option<String>,
    pub trigger_event: serde_json::Value,
    pub action_taken: String,
    pub result: ExecutionResult,
    pub details: String,
    /// Externally-returned confirmation, present on success.
    pub confirmation_id: Option<String>,
    pub idempotency_key: String,
    pub execution_time_ms: i64,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub executed_at: String,
}

/// Lifecycle state of a payer authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Active,
    RenewalRequested,
    Expired,
}

/// A prior authorization tracked for expiry-driven automation.
///
/// Status updates are version-validated (OCC): an update conditional on
/// `version = expected_version` fails with `VersionConflict` if another
/// transaction got there first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub id: String,
    pub tenant_id: String,
    pub payer: String,
    pub procedure_code: String,
    pub status: AuthorizationStatus,
    pub auth_expiration_date: Date,
    pub reauth_lead_time_days: i64,
    pub auto_reauth_enabled: bool,
    pub version: i64,
}

/// Alert severity bands (calibrated to the drift severity score:
/// >= 0.7 high, >= 0.4 medium, else low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A human-facing alert produced by the escalation router.
///
/// At most one alert per execution-log entry (unique `execution_log_id`,
/// enforced by the backend). Suppressed alerts are still recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub tenant_id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub evidence: serde_json::Value,
    pub execution_log_id: String,
    /// True when delivery was withheld by the cooldown window; the alert
    /// is recorded either way.
    pub suppressed: bool,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}
