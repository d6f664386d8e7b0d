//! Engine error taxonomy.
//!
//! Configuration problems (a malformed rule, a predicate referencing a
//! field the event does not carry) are skip-and-log: they never escalate
//! to a customer-facing alert and never count as a rule match.

/// A rule-configuration defect detected at save time or evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The predicate tree is structurally invalid.
    #[error("malformed predicate: {detail}")]
    MalformedPredicate { detail: String },

    /// The predicate references a field absent from the event payload.
    #[error("unknown event field: {field}")]
    UnknownField { field: String },
}
