//! Concurrency-safe execution coordinator.
//!
//! Drives each action through
//! `PENDING -> LOCKING -> EXECUTING -> {COMMITTED, FAILED, ESCALATED}`.
//! Exactly-once semantics rest on two layers: a deterministic idempotency
//! key checked before execution, and the storage backend's unique-key
//! constraint at commit, which decides any race the pre-check missed.

use std::collections::HashSet;
use std::time::Instant;

use autopilot_core::{Action, ActionType};
use autopilot_storage::{
    AuthorizationStatus, EngineStorage, ExecutionLogRecord, ExecutionResult, StorageError,
};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::escalate::EscalationRouter;
use crate::executor::{ActionExecutor, Confirmation, ExecError};
use crate::locks::LockManager;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bounded wait per lock key.
    pub lock_timeout: std::time::Duration,
    /// Bounded wait for one executor call.
    pub action_timeout: std::time::Duration,
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Backoff after attempt n is `backoff_base * 2^(n-1)`.
    pub backoff_base: std::time::Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: std::time::Duration::from_secs(5),
            action_timeout: std::time::Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: std::time::Duration::from_secs(2),
        }
    }
}

/// Terminal outcome of coordinating one action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Executed and committed in this call.
    Committed {
        log_id: String,
        confirmation_id: String,
    },
    /// Already executed earlier (or by a concurrent worker); the recorded
    /// result is returned without re-execution. A successful no-op.
    Duplicate {
        log_id: String,
        result: ExecutionResult,
    },
    /// Terminal failure, no alert.
    Failed { log_id: String },
    /// Terminal failure on a rule with `escalate_on_error`; alert routed.
    Escalated { log_id: String },
    /// Short-circuited within a batch after an equivalent action succeeded.
    Skipped,
}

/// Deterministic idempotency key: SHA-256 over the rule, the event
/// identity, and the sorted target set.
pub fn idempotency_key(action: &Action) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action.rule_id.as_bytes());
    hasher.update(b"|");
    hasher.update(action.event.identity.as_bytes());
    for target in &action.target_entity_ids {
        hasher.update(b"|");
        hasher.update(target.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub struct Coordinator<S, E> {
    storage: S,
    executor: E,
    locks: std::sync::Arc<LockManager>,
    router: EscalationRouter,
    config: CoordinatorConfig,
}

impl<S: EngineStorage, E: ActionExecutor> Coordinator<S, E> {
    pub fn new(
        storage: S,
        executor: E,
        locks: std::sync::Arc<LockManager>,
        router: EscalationRouter,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            locks,
            router,
            config,
        }
    }

    /// Coordinate one action to a terminal outcome.
    pub async fn execute(&self, action: &Action) -> Result<Outcome, StorageError> {
        let key = idempotency_key(action);

        // Idempotency pre-check against committed state. The commit-time
        // unique constraint closes whatever window remains.
        if let Some(existing) = self.storage.get_execution_log_by_key(&key).await? {
            info!(
                rule_id = %action.rule_id,
                identity = %action.event.identity,
                log_id = %existing.id,
                "duplicate action, returning recorded result"
            );
            return Ok(Outcome::Duplicate {
                log_id: existing.id,
                result: existing.result,
            });
        }

        // Rule config was captured onto the action at evaluation time;
        // never re-fetched here.
        let escalate_on_error = action.escalate_on_error;
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut last_error = String::new();

        loop {
            attempt += 1;

            // LOCKING. A timeout here is transient: the holder will finish.
            let lock_set = match self
                .locks
                .acquire(&action.lock_keys, self.config.lock_timeout)
                .await
            {
                Ok(set) => set,
                Err(timeout) => {
                    last_error = timeout.to_string();
                    if attempt >= self.config.max_attempts {
                        break;
                    }
                    self.backoff(attempt).await;
                    continue;
                }
            };

            // EXECUTING, bounded.
            let confirmation = match tokio::time::timeout(
                self.config.action_timeout,
                self.executor.execute(action),
            )
            .await
            {
                Ok(Ok(confirmation)) => Some(confirmation),
                Ok(Err(ExecError::Permanent(msg))) => {
                    // Retrying cannot help; terminal on the spot. The rule's
                    // escalation flag still decides whether a human hears
                    // about it.
                    drop(lock_set);
                    warn!(
                        rule_id = %action.rule_id,
                        identity = %action.event.identity,
                        error = %msg,
                        "permanent execution failure"
                    );
                    let (result, alert) = if escalate_on_error {
                        (ExecutionResult::Escalated, true)
                    } else {
                        (ExecutionResult::Failed, false)
                    };
                    return self
                        .commit_terminal(action, &key, result, &msg, started, alert)
                        .await;
                }
                Ok(Err(ExecError::Transient(msg))) => {
                    last_error = msg;
                    None
                }
                Err(_elapsed) => {
                    // The call timed out; the side effect may or may not
                    // have landed. Ask before retrying.
                    match self.executor.check_confirmation(action, &key).await {
                        Ok(Some(confirmation)) => Some(confirmation),
                        Ok(None) => {
                            last_error =
                                "execution timed out with no confirmation on poll".to_string();
                            None
                        }
                        Err(e) => {
                            last_error = format!("confirmation poll failed: {e}");
                            None
                        }
                    }
                }
            };

            match confirmation {
                Some(confirmation) => {
                    let outcome = self
                        .commit_success(action, &key, confirmation, started)
                        .await;
                    drop(lock_set);
                    return outcome;
                }
                None => {
                    drop(lock_set);
                    if attempt >= self.config.max_attempts {
                        break;
                    }
                    self.backoff(attempt).await;
                }
            }
        }

        // Retries exhausted.
        let details = format!(
            "exhausted {} attempts, last error: {}",
            self.config.max_attempts, last_error
        );
        if escalate_on_error {
            self.commit_terminal(action, &key, ExecutionResult::Escalated, &details, started, true)
                .await
        } else {
            self.commit_terminal(action, &key, ExecutionResult::Failed, &details, started, false)
                .await
        }
    }

    /// Process candidates in evaluator order. After a success for a given
    /// (action type, target set), later candidates for the same pair in
    /// this pass are skipped.
    pub async fn execute_batch(&self, actions: &[Action]) -> Result<Vec<Outcome>, StorageError> {
        let mut satisfied: HashSet<(ActionType, Vec<String>)> = HashSet::new();
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let signature = (action.action_type, action.target_entity_ids.clone());
            if satisfied.contains(&signature) {
                info!(
                    rule_id = %action.rule_id,
                    identity = %action.event.identity,
                    "skipped, equivalent action already succeeded this pass"
                );
                outcomes.push(Outcome::Skipped);
                continue;
            }
            let outcome = self.execute(action).await?;
            let succeeded = matches!(
                &outcome,
                Outcome::Committed { .. }
                    | Outcome::Duplicate {
                        result: ExecutionResult::Success,
                        ..
                    }
            );
            if succeeded {
                satisfied.insert(signature);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// SUCCESS commit: log entry plus the action's local state mutation in
    /// one snapshot. Either both land or neither does.
    async fn commit_success(
        &self,
        action: &Action,
        key: &str,
        confirmation: Confirmation,
        started: Instant,
    ) -> Result<Outcome, StorageError> {
        // OCC on the authorization can lose to a concurrent writer; retry
        // the commit with a fresh version. The external side effect already
        // happened, so giving up here is not an option until the key
        // constraint says someone else recorded it.
        for _ in 0..3 {
            let record = self.build_record(
                action,
                key,
                ExecutionResult::Success,
                &confirmation.details,
                Some(confirmation.confirmation_id.clone()),
                started,
            )?;
            let mut snapshot = self.storage.begin_snapshot().await?;
            self.storage
                .insert_execution_log(&mut snapshot, record.clone())
                .await?;
            if let Err(e) = self.apply_state_mutation(&mut snapshot, action).await {
                match e {
                    StorageError::VersionConflict { .. } => {
                        self.storage.abort_snapshot(snapshot).await?;
                        continue;
                    }
                    other => return Err(other),
                }
            }
            match self.storage.commit_snapshot(snapshot).await {
                Ok(()) => {
                    info!(
                        rule_id = %action.rule_id,
                        identity = %action.event.identity,
                        log_id = %record.id,
                        confirmation_id = %confirmation.confirmation_id,
                        "action committed"
                    );
                    return Ok(Outcome::Committed {
                        log_id: record.id,
                        confirmation_id: confirmation.confirmation_id,
                    });
                }
                Err(StorageError::DuplicateIdempotencyKey { .. }) => {
                    return self.winner_outcome(key).await;
                }
                Err(StorageError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Backend(
            "authorization version moved on every commit attempt".to_string(),
        ))
    }

    /// Terminal FAILED/ESCALATED commit, optionally routing an alert.
    async fn commit_terminal(
        &self,
        action: &Action,
        key: &str,
        result: ExecutionResult,
        details: &str,
        started: Instant,
        alert: bool,
    ) -> Result<Outcome, StorageError> {
        let record = self.build_record(action, key, result, details, None, started)?;
        let mut snapshot = self.storage.begin_snapshot().await?;
        self.storage
            .insert_execution_log(&mut snapshot, record.clone())
            .await?;
        match self.storage.commit_snapshot(snapshot).await {
            Ok(()) => {}
            Err(StorageError::DuplicateIdempotencyKey { .. }) => {
                return self.winner_outcome(key).await;
            }
            Err(e) => return Err(e),
        }

        if alert {
            self.router
                .route(&self.storage, &record, OffsetDateTime::now_utc())
                .await?;
        }
        info!(
            rule_id = %action.rule_id,
            identity = %action.event.identity,
            log_id = %record.id,
            result = ?result,
            "action terminal without success"
        );
        match result {
            ExecutionResult::Escalated => Ok(Outcome::Escalated { log_id: record.id }),
            _ => Ok(Outcome::Failed { log_id: record.id }),
        }
    }

    /// The action's local state change, staged into the success snapshot.
    async fn apply_state_mutation(
        &self,
        snapshot: &mut S::Snapshot,
        action: &Action,
    ) -> Result<(), StorageError> {
        if action.action_type != ActionType::SubmitReauthRequest {
            return Ok(());
        }
        for target in &action.target_entity_ids {
            match self.storage.get_authorization(target).await {
                Ok(auth) => {
                    self.storage
                        .update_authorization_status(
                            snapshot,
                            target,
                            auth.version,
                            AuthorizationStatus::RenewalRequested,
                        )
                        .await?;
                }
                // Payer-scoped targets are not authorization rows.
                Err(StorageError::AuthorizationNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn winner_outcome(&self, key: &str) -> Result<Outcome, StorageError> {
        let winner = self
            .storage
            .get_execution_log_by_key(key)
            .await?
            .ok_or_else(|| StorageError::ExecutionLogNotFound {
                key: key.to_string(),
            })?;
        info!(log_id = %winner.id, "lost idempotency race, returning winner's result");
        Ok(Outcome::Duplicate {
            log_id: winner.id,
            result: winner.result,
        })
    }

    fn build_record(
        &self,
        action: &Action,
        key: &str,
        result: ExecutionResult,
        details: &str,
        confirmation_id: Option<String>,
        started: Instant,
    ) -> Result<ExecutionLogRecord, StorageError> {
        let trigger_event = serde_json::to_value(&action.event)
            .map_err(|e| StorageError::Backend(format!("event serialization: {e}")))?;
        Ok(ExecutionLogRecord {
            id: format!("exec-{:032x}", rand::random::<u128>()),
            tenant_id: action.tenant_id.clone(),
            rule_id: Some(action.rule_id.clone()),
            trigger_event,
            action_taken: action.action_type.as_str().to_string(),
            result,
            details: details.to_string(),
            confirmation_id,
            idempotency_key: key.to_string(),
            execution_time_ms: started.elapsed().as_millis() as i64,
            executed_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|e| StorageError::Backend(format!("timestamp format: {e}")))?,
        })
    }

    async fn backoff(&self, attempt: u32) {
        let factor = 1u32 << (attempt - 1).min(8);
        tokio::time::sleep(self.config.backoff_base * factor).await;
    }
}
