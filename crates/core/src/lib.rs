//! Autopilot core -- domain types, the rule predicate language, and the
//! engine error taxonomy.
//!
//! Everything in this crate is pure data and pure functions: no storage,
//! no clocks, no side effects. The detect and engine crates build on top.

pub mod error;
pub mod predicate;
pub mod rule;
pub mod types;

pub use error::ConfigurationError;
pub use predicate::{CompareOp, Predicate};
pub use rule::{AutomationRule, TriggerKind};
pub use types::{
    Action, ActionType, Baseline, BehaviorChangeEvent, ClaimOutcome, LockKey, LockKind, Signal,
    TriggerEvent,
};
