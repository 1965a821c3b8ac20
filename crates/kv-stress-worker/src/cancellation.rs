//! The two cancellation signals spec §5 asks for: a `terminate` flag and
//! interruption of blocking sleeps. A single atomic flag models both, since
//! Rust threads have no portable interrupt primitive; every sleep in this
//! crate polls it instead of sleeping uninterruptibly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared handle a worker and its controller both hold.
#[derive(Debug, Default)]
pub struct CancellationToken {
    terminate: AtomicBool,
}

impl CancellationToken {
    /// A token in the non-cancelled state.
    pub fn new() -> Self {
        CancellationToken {
            terminate: AtomicBool::new(false),
        }
    }

    /// Request that the owning worker stop at the next observation point.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Sleep for `dur`, polling for cancellation. Returns `true` if the full
    /// duration elapsed, `false` if cancelled early.
    pub fn sleep(&self, dur: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.is_cancelled() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= dur {
                return true;
            }
            std::thread::sleep(POLL_INTERVAL.min(dur - elapsed));
        }
    }
}
