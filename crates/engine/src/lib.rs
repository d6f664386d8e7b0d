//! Execution engine: rule evaluation, lock-ordered coordination,
//! authorization expiry scanning, and escalation routing.
//!
//! The flow through this crate is
//! detector/scanner event -> [`evaluate`] -> `Action` candidates ->
//! [`Coordinator::execute_batch`] -> execution log + alerts. All side
//! effects go through the [`ActionExecutor`] seam; all persistence goes
//! through `EngineStorage`.

pub mod coordinator;
pub mod escalate;
pub mod evaluate;
pub mod executor;
pub mod locks;
pub mod scan;
pub mod testing;

pub use coordinator::{idempotency_key, Coordinator, CoordinatorConfig, Outcome};
pub use escalate::{EscalationRouter, RouterConfig};
pub use evaluate::{evaluate_event, evaluate_rules};
pub use executor::{ActionExecutor, Confirmation, ExecError};
pub use locks::{canonical_lock_order, LockManager, LockSet, LockTimeout};
pub use scan::ExpiryScanner;
