//! Configuration options recognized by the stressor core (spec §6).
//!
//! A plain `serde`-derived struct with a `Default` impl, loadable from YAML
//! by the CLI crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::operation::OperationMix;

/// All configuration the stressor core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressorConfig {
    /// Number of stressor threads run by this process.
    pub num_threads: u32,
    /// Number of checker ("slave") processes in the deployment.
    pub num_slaves: u32,
    /// This process's index among `numSlaves`, used to derive thread ids.
    pub slave_index: u32,
    /// Key domain size used by `SharedLogLogic`.
    pub num_entries: u64,
    /// Payload size in bytes for the legacy/load path.
    pub entry_size: usize,
    /// Ops per transaction; `<= 0` disables transactions.
    pub transaction_size: i64,
    /// Sleep between `invoke()` calls.
    pub delay_between_requests: Duration,
    /// Choose log logic (`PrivateLogLogic`/`SharedLogLogic`) over legacy.
    pub use_log_values: bool,
    /// Choose `SharedLogLogic` over `PrivateLogLogic` (only meaningful when
    /// `use_log_values` is set).
    pub shared_keys: bool,
    /// Threshold that triggers checker-driven shift/filter.
    pub log_value_max_size: usize,
    /// Frequency, in committed ops, of checkpoint writes in
    /// non-transactional mode.
    pub log_counter_update_period: u64,
    /// Enables the dead-checker bypass protocol.
    pub ignore_dead_checkers: bool,
    /// Load phase uses `putIfAbsent` instead of `put`.
    pub load_with_put_if_absent: bool,
    /// Exit after the load phase.
    pub load_only: bool,
    /// Probability distribution for the legacy driver.
    pub operation_mix: OperationMix,
    /// Namespace parameter passed to every cache call.
    pub bucket_id: String,
}

impl Default for StressorConfig {
    fn default() -> Self {
        StressorConfig {
            num_threads: 4,
            num_slaves: 1,
            slave_index: 0,
            num_entries: 10_000,
            entry_size: 128,
            transaction_size: 0,
            delay_between_requests: Duration::from_millis(0),
            use_log_values: true,
            shared_keys: false,
            log_value_max_size: 32,
            log_counter_update_period: 50,
            ignore_dead_checkers: false,
            load_with_put_if_absent: false,
            load_only: false,
            operation_mix: OperationMix::default(),
            bucket_id: "default".to_string(),
        }
    }
}

impl StressorConfig {
    /// `threadId = slaveIndex * numThreads + idx`, the global thread-id
    /// space described in spec §6.
    pub fn thread_id(&self, idx: u32) -> u64 {
        (self.slave_index as u64) * (self.num_threads as u64) + (idx as u64)
    }

    /// Transactions are enabled whenever `transactionSize > 0`.
    pub fn transactional(&self) -> bool {
        self.transaction_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_formula() {
        let mut cfg = StressorConfig::default();
        cfg.num_threads = 8;
        cfg.slave_index = 2;
        assert_eq!(cfg.thread_id(3), 2 * 8 + 3);
    }

    #[test]
    fn transaction_size_zero_or_negative_disables_transactions() {
        let mut cfg = StressorConfig::default();
        cfg.transaction_size = 0;
        assert!(!cfg.transactional());
        cfg.transaction_size = -5;
        assert!(!cfg.transactional());
        cfg.transaction_size = 1;
        assert!(cfg.transactional());
    }

    #[test]
    fn roundtrips_through_serde() {
        let cfg = StressorConfig::default();
        let encoded = serde_json::to_string(&cfg).unwrap();
        let decoded: StressorConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cfg, decoded);
    }
}
