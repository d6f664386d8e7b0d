use async_trait::async_trait;

use autopilot_core::{AutomationRule, Baseline, Signal};
use time::{Date, OffsetDateTime};

use crate::error::StorageError;
use crate::record::{
    AlertRecord, AuthorizationRecord, AuthorizationStatus, ExecutionLogRecord,
};

/// The storage trait for Autopilot execution backends.
///
/// An `EngineStorage` implementation provides durable, transactional
/// storage for signals, baselines, automation rules, authorizations, the
/// execution log, and alerts.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing
/// an in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` — start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` — commit and consume the transaction
///    OR `abort_snapshot(snapshot)` — roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying
/// transaction MUST be rolled back.
///
/// ## Constraint Enforcement
///
/// Uniqueness constraints are enforced by the backend AT COMMIT, not by
/// check-then-insert in application code:
///
/// - `execution_log.idempotency_key` is unique. Two concurrent snapshots
///   staging the same key both accept the insert, but only the first
///   commit succeeds; the second fails with
///   `StorageError::DuplicateIdempotencyKey`. This is the single source of
///   truth for "has this action already happened".
/// - `alerts.execution_log_id` is unique (`StorageError::DuplicateAlert`),
///   making escalation routing idempotent per log entry.
/// - `update_authorization_status` is version-validated (OCC): conditional
///   on `version = expected_version`, failing with
///   `StorageError::VersionConflict` when stale.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// concurrent worker tasks.
#[async_trait]
pub trait EngineStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this backend. Must be
    /// `Send` to cross async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable. Constraint
    /// violations surface here.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Mutations (within snapshot) ──────────────────────────────────────────

    /// Append a signal. Signals are immutable facts; there is no update.
    async fn insert_signal(
        &self,
        snapshot: &mut Self::Snapshot,
        signal: Signal,
    ) -> Result<(), StorageError>;

    /// Upsert a baseline row by (tenant, payer, procedure_code).
    async fn upsert_baseline(
        &self,
        snapshot: &mut Self::Snapshot,
        baseline: Baseline,
    ) -> Result<(), StorageError>;

    /// Insert an execution-log entry. The unique idempotency-key check
    /// happens at commit.
    async fn insert_execution_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ExecutionLogRecord,
    ) -> Result<(), StorageError>;

    /// Insert an alert. The unique execution_log_id check happens at commit.
    async fn insert_alert(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AlertRecord,
    ) -> Result<(), StorageError>;

    /// Create or replace an automation rule (rule configuration is owned
    /// by an external management surface; the engine only reads).
    async fn put_rule(
        &self,
        snapshot: &mut Self::Snapshot,
        rule: AutomationRule,
    ) -> Result<(), StorageError>;

    /// Create or replace an authorization row.
    async fn put_authorization(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AuthorizationRecord,
    ) -> Result<(), StorageError>;

    /// Apply a version-validated status update to an authorization (OCC).
    ///
    /// Returns the new version number on success.
    async fn update_authorization_status(
        &self,
        snapshot: &mut Self::Snapshot,
        authorization_id: &str,
        expected_version: i64,
        new_status: AuthorizationStatus,
    ) -> Result<i64, StorageError>;

    // ── Queries (outside snapshot, committed state only) ──────────────────────

    /// All tenant ids with at least one signal (batch-job enumeration).
    async fn list_tenants(&self) -> Result<Vec<String>, StorageError>;

    /// Decided signals for a tenant in [from, to).
    async fn list_decided_signals(
        &self,
        tenant_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Signal>, StorageError>;

    /// (denied, total) decided-signal counts for (tenant, payer) in [from, to).
    async fn signal_counts(
        &self,
        tenant_id: &str,
        payer: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<(u64, u64), StorageError>;

    /// Distinct procedure codes among denied signals for (tenant, payer)
    /// in [from, to).
    async fn denied_codes(
        &self,
        tenant_id: &str,
        payer: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<String>, StorageError>;

    /// Denied-signal count for (tenant, payer) decided since `since`.
    /// Point read backing the recent-denial-streak risk factor.
    async fn count_denials_since(
        &self,
        tenant_id: &str,
        payer: &str,
        since: OffsetDateTime,
    ) -> Result<u64, StorageError>;

    /// Committed baseline for a (tenant, payer, procedure_code) key.
    /// None means insufficient data, not zero risk.
    async fn get_baseline(
        &self,
        tenant_id: &str,
        payer: &str,
        procedure_code: &str,
    ) -> Result<Option<Baseline>, StorageError>;

    /// Committed execution-log entry by idempotency key, if any.
    /// The coordinator's pre-check.
    async fn get_execution_log_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ExecutionLogRecord>, StorageError>;

    /// Execution-log entries for a tenant, newest first, optionally
    /// filtered by result. `limit` of 0 means no limit.
    async fn list_execution_logs(
        &self,
        tenant_id: &str,
        result: Option<crate::record::ExecutionResult>,
        limit: usize,
    ) -> Result<Vec<ExecutionLogRecord>, StorageError>;

    /// Enabled rules for a tenant in creation order (stable, deterministic).
    async fn list_enabled_rules(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AutomationRule>, StorageError>;

    /// All authorizations for a tenant.
    async fn list_authorizations(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AuthorizationRecord>, StorageError>;

    /// A single authorization by id.
    async fn get_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationRecord, StorageError>;

    /// Alerts for a tenant, newest first.
    async fn list_alerts(&self, tenant_id: &str) -> Result<Vec<AlertRecord>, StorageError>;

    /// Non-suppressed alerts for a tenant created at or after `since`
    /// (the suppression-window lookback).
    async fn list_recent_alerts(
        &self,
        tenant_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<AlertRecord>, StorageError>;

    /// Cross-tenant (denied, total) decided-signal counts per payer with
    /// decisions on or after `since`. Read-only; feeds the network view.
    async fn network_signal_counts(
        &self,
        since: Date,
    ) -> Result<Vec<(String, u64, u64)>, StorageError>;
}
