//! Conformance test suite for `EngineStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `EngineStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots
//! - **Idempotency**: unique execution-log keys and alert dedupe at commit
//! - **Version validation / OCC**: stale authorization updates rejected
//! - **Concurrency**: races decided by the backend, exactly one winner
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use autopilot_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod idempotency;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use autopilot_core::{ClaimOutcome, Signal};
use rust_decimal::Decimal;
use time::macros::datetime;

use crate::record::{
    AlertRecord, AuthorizationRecord, AuthorizationStatus, ExecutionLogRecord, ExecutionResult,
    Severity,
};
use crate::EngineStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "snapshot", "commit", "idempotency").
    pub category: String,
    /// Test name (e.g. "uncommitted_writes_invisible").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: EngineStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(idempotency::run_idempotency_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_signal(tenant_id: &str, payer: &str, outcome: ClaimOutcome) -> Signal {
    Signal {
        tenant_id: tenant_id.to_string(),
        payer: payer.to_string(),
        procedure_code: "99213".to_string(),
        outcome,
        amount: Decimal::new(15000, 2),
        submitted_at: datetime!(2026-08-01 00:00:00 UTC),
        decided_at: Some(datetime!(2026-08-10 12:00:00 UTC)),
    }
}

fn make_execution_log(id: &str, idempotency_key: &str) -> ExecutionLogRecord {
    ExecutionLogRecord {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        rule_id: Some("rule-1".to_string()),
        trigger_event: serde_json::json!({"kind": "behavior_shift"}),
        action_taken: "hold_claim".to_string(),
        result: ExecutionResult::Success,
        details: String::new(),
        confirmation_id: Some("conf-123".to_string()),
        idempotency_key: idempotency_key.to_string(),
        execution_time_ms: 12,
        executed_at: "2026-08-10T12:00:00Z".to_string(),
    }
}

fn make_alert(id: &str, execution_log_id: &str) -> AlertRecord {
    AlertRecord {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        severity: Severity::High,
        title: "automated action failed".to_string(),
        description: "retries exhausted".to_string(),
        evidence: serde_json::json!({"attempts": 3}),
        execution_log_id: execution_log_id.to_string(),
        suppressed: false,
        created_at: "2026-08-10T12:00:00Z".to_string(),
    }
}

fn make_authorization(id: &str) -> AuthorizationRecord {
    AuthorizationRecord {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        payer: "BCBS".to_string(),
        procedure_code: "99213".to_string(),
        status: AuthorizationStatus::Active,
        auth_expiration_date: time::macros::date!(2026 - 09 - 15),
        reauth_lead_time_days: 30,
        auto_reauth_enabled: true,
        version: 0,
    }
}
