//! EngineStorage trait, record types, error types, the in-memory
//! reference backend, and a backend-agnostic conformance suite.

pub mod conformance;
pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use record::{
    AlertRecord, AuthorizationRecord, AuthorizationStatus, ExecutionLogRecord, ExecutionResult,
    Severity,
};
pub use traits::EngineStorage;
