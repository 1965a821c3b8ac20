#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **kv-stress-worker** – the stressor thread state machine (spec §2, §4).
//!
//! This crate owns everything that drives a single worker's execution:
//! [`StressorWorker`]'s load-phase/op-phase lifecycle, the baseline
//! [`LegacyLogic`] driver, the shared [`LogLogicBase`] state machine
//! (operation-id counter, transaction framing, rollback replay, delayed
//! removes, checker synchronization), and the two concrete log logics,
//! [`PrivateLogLogic`] and [`SharedLogLogic`], that plug into it. It depends
//! on `kv-stress-types` for the pure data model and `kv-stress-cache` for
//! the backend contract, but performs no I/O of its own beyond calling
//! through that contract.

/// Cooperative cancellation: the `terminate` flag plus interruptible sleeps.
pub mod cancellation;
/// The fault channel layered over `CacheError`/`StressorError`.
pub mod error;
/// `LegacyLogic` — the non-log baseline driver.
pub mod legacy;
/// `LogLogicBase` — the shared log-logic state machine.
pub mod log_base;
/// `PrivateLogLogic`.
pub mod private_logic;
/// `SharedLogLogic`.
pub mod shared_logic;
/// Per-worker request/latency/error accounting.
pub mod stats;
/// `StressorWorker` — load phase + op loop + lifecycle.
pub mod worker;

pub use cancellation::CancellationToken;
pub use error::LogicFault;
pub use legacy::LegacyLogic;
pub use log_base::{CheckedOperation, DelayedRemove, LogLogicBase, LogMode, NextValueOutcome};
pub use private_logic::PrivateLogLogic;
pub use shared_logic::SharedLogLogic;
pub use stats::{Stats, StatsSnapshot};
pub use worker::{identity_worker, StressorWorker, WorkerHandle, WorkerStatus};
