#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(clippy::module_inception)]

//! **kv-stress-types** – core data model for the kv-stress workload
//! generator.
//!
//! This crate holds the pieces of the stressor that are pure data and pure
//! algebra: the operation taxonomy, the two tamper-evident log-value types
//! and their merge/shift semantics, a replayable PRNG, the stressor's
//! configuration surface, and the small external-collaborator traits
//! (key generation, checker liveness). Nothing here performs I/O; the cache
//! backend contract lives in `kv-stress-cache`, and the state machine that
//! drives it lives in `kv-stress-worker`.

/// Configuration options recognized by the stressor core.
pub mod config;
/// Error and control-flow signal types.
pub mod error;
/// The tamper-evident log-value types and their algebra.
pub mod log_value;
/// The tagged operation type and the legacy driver's probability mix.
pub mod operation;
/// A fully-serializable, replayable PRNG.
pub mod rng;
/// Small external-collaborator contracts (key generation, liveness).
pub mod traits;

pub use config::StressorConfig;
pub use error::{InvokeOutcome, StressorError};
pub use log_value::{OperationId, PrivateLogValue, SharedLogValue, ThreadId};
pub use operation::{Operation, OperationMix};
pub use rng::ReplayableRng;
pub use traits::{AlwaysAlive, IdentityKeyGenerator, KeyGenerator, NeverAlive, SlaveLiveness};
