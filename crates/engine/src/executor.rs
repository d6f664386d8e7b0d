//! The execution seam between the coordinator and the outside world.
//!
//! `ActionExecutor` implementations own the actual side effect: a payer
//! portal submission, an appeal packet, a claim hold. The coordinator never
//! sees transport details; it sees a confirmation or a classified error,
//! and drives retries purely off that classification.

use async_trait::async_trait;
use autopilot_core::Action;

/// Classified execution failure. The classification IS the retry policy:
/// transient failures are retried with backoff, permanent failures are
/// terminal on the first attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    /// Worth retrying: network failure, upstream 5xx, portal unavailable,
    /// lock contention downstream.
    #[error("transient execution failure: {0}")]
    Transient(String),
    /// Retrying cannot help: invalid credentials, captcha or other
    /// manual-intervention wall, malformed request rejected upstream.
    #[error("permanent execution failure: {0}")]
    Permanent(String),
}

/// Proof that a side effect landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Externally-issued confirmation identifier. Never empty on success.
    pub confirmation_id: String,
    pub details: String,
}

/// Executes actions against external systems.
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    /// Perform the side effect. The coordinator bounds this call with a
    /// timeout; implementations should not install their own outer retry.
    async fn execute(&self, action: &Action) -> Result<Confirmation, ExecError>;

    /// After a timed-out `execute`, answer whether the submission actually
    /// landed. `Ok(None)` means "no trace of it", which makes a retry safe.
    /// Blind retry of a non-idempotent submission is a correctness hazard;
    /// this poll is what stands between a timeout and a double submission.
    async fn check_confirmation(
        &self,
        action: &Action,
        idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError>;
}

#[async_trait]
impl<T: ActionExecutor> ActionExecutor for std::sync::Arc<T> {
    async fn execute(&self, action: &Action) -> Result<Confirmation, ExecError> {
        (**self).execute(action).await
    }

    async fn check_confirmation(
        &self,
        action: &Action,
        idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError> {
        (**self).check_confirmation(action, idempotency_key).await
    }
}
