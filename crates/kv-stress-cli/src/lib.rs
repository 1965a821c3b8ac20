#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **kv-stress-cli** – the binary entry point for the kv-stress workload
//! generator: config loading, `tracing-subscriber` initialization, worker
//! thread fan-out, and periodic stats reporting (SPEC_FULL E1/E4).
//!
//! The library half is split out from `main.rs` so the config-merge and
//! run-loop logic is unit-testable without spawning a real process.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kv_stress_cache_memory::MemoryBackend;
use kv_stress_types::{AlwaysAlive, StressorConfig};
use kv_stress_worker::{identity_worker, WorkerHandle, WorkerStatus};

/// Command-line flags recognized by the `kv-stress` binary.
///
/// Every flag mirrors a [`StressorConfig`] field (spec §6); flags override
/// whatever a `--config` file supplied, and the file overrides the built-in
/// defaults.
#[derive(Parser, Debug, Clone)]
#[command(name = "kv-stress", version, about = "Background workload generator for distributed key-value stores, with a tamper-evident operation log.")]
pub struct Cli {
    /// YAML file holding a [`StressorConfig`]; flags below override it field
    /// by field.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Log level passed to `tracing-subscriber`'s `EnvFilter`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Number of stressor threads this process runs.
    #[arg(long)]
    pub num_threads: Option<u32>,
    /// Number of checker ("slave") processes in the deployment.
    #[arg(long)]
    pub num_slaves: Option<u32>,
    /// This process's index among `num_slaves`.
    #[arg(long)]
    pub slave_index: Option<u32>,
    /// Key domain size used by `SharedLogLogic`.
    #[arg(long)]
    pub num_entries: Option<u64>,
    /// Payload size in bytes for the legacy/load path.
    #[arg(long)]
    pub entry_size: Option<usize>,
    /// Ops per transaction; `<= 0` disables transactions.
    #[arg(long)]
    pub transaction_size: Option<i64>,
    /// Milliseconds to sleep between `invoke()` calls.
    #[arg(long)]
    pub delay_between_requests_ms: Option<u64>,
    /// Choose log logic over the legacy driver.
    #[arg(long)]
    pub use_log_values: Option<bool>,
    /// Choose `SharedLogLogic` over `PrivateLogLogic`.
    #[arg(long)]
    pub shared_keys: Option<bool>,
    /// Threshold that triggers checker-driven shift/filter.
    #[arg(long)]
    pub log_value_max_size: Option<usize>,
    /// Frequency, in committed ops, of checkpoint writes in
    /// non-transactional mode.
    #[arg(long)]
    pub log_counter_update_period: Option<u64>,
    /// Enables the dead-checker bypass protocol.
    #[arg(long)]
    pub ignore_dead_checkers: Option<bool>,
    /// Load phase uses `putIfAbsent` instead of `put`.
    #[arg(long)]
    pub load_with_put_if_absent: Option<bool>,
    /// Exit after the load phase.
    #[arg(long)]
    pub load_only: Option<bool>,
    /// Namespace parameter passed to every cache call.
    #[arg(long)]
    pub bucket_id: Option<String>,
    /// How often, in seconds, the reporter thread logs aggregate stats.
    #[arg(long, default_value_t = 10)]
    pub report_interval_secs: u64,
}

impl Cli {
    /// Build the effective [`StressorConfig`]: start from the `--config`
    /// file (or [`StressorConfig::default`] if none was given), then apply
    /// every flag the user actually passed.
    pub fn resolve_config(&self) -> Result<StressorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => StressorConfig::default(),
        };

        if let Some(v) = self.num_threads {
            config.num_threads = v;
        }
        if let Some(v) = self.num_slaves {
            config.num_slaves = v;
        }
        if let Some(v) = self.slave_index {
            config.slave_index = v;
        }
        if let Some(v) = self.num_entries {
            config.num_entries = v;
        }
        if let Some(v) = self.entry_size {
            config.entry_size = v;
        }
        if let Some(v) = self.transaction_size {
            config.transaction_size = v;
        }
        if let Some(v) = self.delay_between_requests_ms {
            config.delay_between_requests = Duration::from_millis(v);
        }
        if let Some(v) = self.use_log_values {
            config.use_log_values = v;
        }
        if let Some(v) = self.shared_keys {
            config.shared_keys = v;
        }
        if let Some(v) = self.log_value_max_size {
            config.log_value_max_size = v;
        }
        if let Some(v) = self.log_counter_update_period {
            config.log_counter_update_period = v;
        }
        if let Some(v) = self.ignore_dead_checkers {
            config.ignore_dead_checkers = v;
        }
        if let Some(v) = self.load_with_put_if_absent {
            config.load_with_put_if_absent = v;
        }
        if let Some(v) = self.load_only {
            config.load_only = v;
        }
        if let Some(v) = self.bucket_id.clone() {
            config.bucket_id = v;
        }

        Ok(config)
    }
}

/// Spawn one OS thread per configured worker against an in-memory cache
/// backend, run until `Ctrl-C` or `load_only` completes, then join every
/// thread. A separate reporting loop on the calling thread polls each
/// worker's stats on `report_interval_secs` until every worker has stopped.
pub fn run(cli: &Cli) -> Result<()> {
    let config = cli.resolve_config()?;
    let cache = Arc::new(MemoryBackend::<i64>::new());
    let liveness = Arc::new(AlwaysAlive);

    let mut handles: Vec<WorkerHandle> = Vec::with_capacity(config.num_threads as usize);
    let mut threads: Vec<JoinHandle<()>> = Vec::with_capacity(config.num_threads as usize);

    for idx in 0..config.num_threads {
        let thread_id = config.thread_id(idx);
        let mut worker = identity_worker(thread_id, cache.clone(), liveness.clone(), config.clone());
        let handle = worker.handle();
        handles.push(handle);
        threads.push(
            std::thread::Builder::new()
                .name(format!("kv-stress-worker-{thread_id}"))
                .spawn(move || worker.run())
                .with_context(|| format!("spawning worker thread {thread_id}"))?,
        );
    }

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received shutdown signal");
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .context("installing Ctrl-C handler")?;
    }

    let report_interval = Duration::from_secs(cli.report_interval_secs.max(1));
    loop {
        std::thread::sleep(report_interval);
        report_stats(&handles);
        let all_stopped = handles.iter().all(|h| h.status() == WorkerStatus::Stopped);
        if all_stopped || stop.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
    }

    if stop.load(std::sync::atomic::Ordering::SeqCst) {
        for h in &handles {
            h.request_terminate();
        }
    }
    for t in threads {
        let _ = t.join();
    }
    report_stats(&handles);
    Ok(())
}

fn report_stats(handles: &[WorkerHandle]) {
    for (idx, handle) in handles.iter().enumerate() {
        let snap = handle.snapshot_stats(true);
        let total: u64 = snap.per_op.values().map(|(count, _)| *count).sum();
        tracing::info!(
            worker = idx,
            status = ?handle.status(),
            total_ops = total,
            errors = snap.errors,
            "stressor progress"
        );
    }
}
