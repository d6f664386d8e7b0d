/// All errors that can be returned by an EngineStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An execution-log row with this idempotency key is already committed.
    /// This is the storage-layer uniqueness constraint that closes the race
    /// between concurrent workers -- not a check-then-insert in app code.
    #[error("duplicate idempotency key: {idempotency_key}")]
    DuplicateIdempotencyKey { idempotency_key: String },

    /// An alert for this execution-log entry already exists (escalation
    /// dedupe: at most one alert per failed/escalated entry).
    #[error("alert already recorded for execution log entry {execution_log_id}")]
    DuplicateAlert { execution_log_id: String },

    /// Optimistic concurrency conflict -- another transaction modified the
    /// authorization concurrently. The expected version was not found.
    #[error("version conflict on authorization {authorization_id}: expected version {expected_version}")]
    VersionConflict {
        authorization_id: String,
        expected_version: i64,
    },

    /// No authorization with the given id.
    #[error("authorization not found: {authorization_id}")]
    AuthorizationNotFound { authorization_id: String },

    /// No execution-log entry with the given key or id.
    #[error("execution log entry not found: {key}")]
    ExecutionLogNotFound { key: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
