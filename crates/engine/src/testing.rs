//! Executor doubles for tests.
//!
//! Public (not `#[cfg(test)]`) so integration tests and downstream
//! backends can drive the coordinator without a real portal integration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use autopilot_core::Action;

use crate::executor::{ActionExecutor, Confirmation, ExecError};

/// Always succeeds, with a confirmation id derived from the event identity.
#[derive(Default)]
pub struct StaticExecutor {
    calls: AtomicU32,
}

impl StaticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `execute` calls observed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for StaticExecutor {
    async fn execute(&self, action: &Action) -> Result<Confirmation, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Confirmation {
            confirmation_id: format!("conf-{}", action.event.identity),
            details: "submitted".to_string(),
        })
    }

    async fn check_confirmation(
        &self,
        _action: &Action,
        _idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError> {
        Ok(None)
    }
}

/// Fails with a transient error the first `failures` times, then succeeds.
pub struct FlakyExecutor {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyExecutor {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FlakyExecutor {
    async fn execute(&self, action: &Action) -> Result<Confirmation, ExecError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ExecError::Transient("portal unavailable".to_string()));
        }
        Ok(Confirmation {
            confirmation_id: format!("conf-{}", action.event.identity),
            details: "submitted after retry".to_string(),
        })
    }

    async fn check_confirmation(
        &self,
        _action: &Action,
        _idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError> {
        Ok(None)
    }
}

/// Always fails with the configured classification.
pub struct FailingExecutor {
    error: ExecError,
    calls: AtomicU32,
}

impl FailingExecutor {
    pub fn transient(msg: &str) -> Self {
        Self {
            error: ExecError::Transient(msg.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn permanent(msg: &str) -> Self {
        Self {
            error: ExecError::Permanent(msg.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FailingExecutor {
    async fn execute(&self, _action: &Action) -> Result<Confirmation, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn check_confirmation(
        &self,
        _action: &Action,
        _idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError> {
        Ok(None)
    }
}

/// Hangs past any reasonable timeout, then optionally reports that the
/// submission landed when polled. Exercises the timeout-then-poll path.
pub struct HangingExecutor {
    confirm_on_poll: bool,
    polls: AtomicU32,
    confirmation: Mutex<Option<Confirmation>>,
}

impl HangingExecutor {
    pub fn new(confirm_on_poll: bool) -> Self {
        Self {
            confirm_on_poll,
            polls: AtomicU32::new(0),
            confirmation: Mutex::new(None),
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for HangingExecutor {
    async fn execute(&self, action: &Action) -> Result<Confirmation, ExecError> {
        if self.confirm_on_poll {
            // The submission "lands" upstream even though the call hangs.
            let conf = Confirmation {
                confirmation_id: format!("conf-{}", action.event.identity),
                details: "landed despite timeout".to_string(),
            };
            *self
                .confirmation
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(conf);
        }
        std::future::pending::<()>().await;
        unreachable!()
    }

    async fn check_confirmation(
        &self,
        _action: &Action,
        _idempotency_key: &str,
    ) -> Result<Option<Confirmation>, ExecError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .confirmation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
