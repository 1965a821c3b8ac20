//! Error and control-flow signal types shared across the core.
//!
//! `BreakTxRequest` is deliberately not part of this enum: §9's design notes
//! call for modeling it as an explicit return channel rather than reusing
//! the fault channel, so it lives in [`InvokeOutcome`] instead.

use thiserror::Error;

/// A fatal consistency violation (spec §7): the stored value had an
/// unexpected concrete shape, or a checked remove's expected value didn't
/// match. The thread that encounters this must not mask it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StressorError {
    /// A checked remove's prior value didn't match what the logic expected.
    #[error(
        "consistency violation at key {key}: expected removed value {expected:?}, found {found:?}"
    )]
    UnexpectedRemovedValue {
        /// The key the mismatched remove targeted.
        key: String,
        /// The value the logic expected to find.
        expected: String,
        /// The value actually found.
        found: String,
    },

    /// A stored value did not decode as the expected log-value type.
    #[error("consistency violation at key {key}: stored value is not a {expected_type}")]
    UnexpectedValueShape {
        /// The key whose value had an unexpected shape.
        key: String,
        /// The type the logic expected to decode.
        expected_type: String,
    },
}

/// The result of one `invokeLogic` attempt.
///
/// This is the internal control-flow signal hierarchy from spec §4.3/§9:
/// `Break` is "commit what we have now and retry this op in a fresh
/// transaction" (`BreakTxRequest`), not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// The operation logic ran to completion.
    Done {
        /// Whether the outer loop should move on to the next operation id
        /// (`true`) or retry the same one (`false`, e.g. a lost CAS race).
        advance: bool,
    },
    /// `BreakTxRequest`: commit the current transaction now and retry this
    /// operation id in a fresh one.
    Break,
}
