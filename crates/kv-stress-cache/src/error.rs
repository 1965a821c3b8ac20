use thiserror::Error;

/// Failures a [`crate::CacheBackend`] implementation can surface.
///
/// This is the backend half of spec §7's fault taxonomy: `Cancelled` is the
/// cancellation signal that must always be rethrown rather than treated as a
/// retryable fault; `MemberSuspected` is de-emphasized in logging but
/// otherwise handled like `Operation`; everything else is a generic
/// transient fault that triggers rollback-and-replay.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend lacks `putIfAbsent`/`replace`/`remove(old)` support, but
    /// the caller required it (e.g. `loadWithPutIfAbsent` or
    /// `SharedLogLogic`).
    #[error("backend does not support atomic compare-and-swap operations")]
    AtomicCapabilityUnavailable,

    /// The calling thread was cancelled (terminate flag or interruption).
    /// Must always be rethrown, never swallowed as a generic fault.
    #[error("operation cancelled")]
    Cancelled,

    /// `endTransaction`/a transactional op was called with no open
    /// transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// `startTransaction` was called while a transaction was already open.
    #[error("a transaction is already open")]
    TransactionAlreadyOpen,

    /// A member of the cluster was suspected faulty (identified in the
    /// original system by an opaque marker in the exception class name,
    /// e.g. `SuspectException`); treated as a retryable, de-emphasized fault.
    #[error("member suspected: {0}")]
    MemberSuspected(String),

    /// Any other backend-specific failure; triggers transactional rollback
    /// and replay, or (outside a transaction) a logged retry of the same
    /// operation id.
    #[error("backend operation failed: {0}")]
    Operation(String),
}

impl CacheError {
    /// Whether this failure represents cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }

    /// Whether this failure is the de-emphasized "member suspected" case.
    pub fn is_member_suspected(&self) -> bool {
        matches!(self, CacheError::MemberSuspected(_))
    }
}
