//! The fault channel the worker crate adds on top of the cache backend's own
//! [`CacheError`] and the core's [`StressorError`].

use kv_stress_cache::CacheError;
use kv_stress_types::StressorError;
use thiserror::Error;

/// Everything an `invoke_logic`/`invoke` call can fail with.
///
/// `Cache` faults are transient and drive rollback-and-replay (spec §7);
/// `Consistency` faults are fatal and must propagate to the worker thread
/// untouched.
#[derive(Debug, Error)]
pub enum LogicFault {
    /// A backend-level fault (including cancellation and member-suspected).
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A fatal consistency violation.
    #[error(transparent)]
    Consistency(#[from] StressorError),
}

impl LogicFault {
    /// Whether this fault is the cancellation signal, which must always be
    /// rethrown rather than treated as a retryable fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LogicFault::Cache(e) if e.is_cancelled())
    }

    /// Whether this fault is a fatal consistency violation.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, LogicFault::Consistency(_))
    }
}
