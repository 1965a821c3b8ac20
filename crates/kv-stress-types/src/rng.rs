//! A small, fully-serializable PRNG.
//!
//! Determinism across crash/restart requires a generator whose entire state
//! fits in one integer that we can checkpoint alongside `operationId`. A
//! system RNG (`rand::thread_rng`, OS entropy) hides its internal state and
//! cannot be replayed, so we use xorshift64* instead — it is not
//! cryptographically strong, which is fine: its only job here is to pick
//! keys and operations reproducibly, not to resist prediction.

use rand::RngCore;

/// xorshift64* generator, seeded and checkpointed by a single `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayableRng {
    state: u64,
}

impl ReplayableRng {
    /// Seed the generator. A zero seed would make xorshift64 degenerate
    /// (it would only ever produce zero), so it is remapped to a fixed
    /// nonzero constant.
    pub fn from_seed(seed: u64) -> Self {
        ReplayableRng {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    /// The current state, suitable for persisting as a `LastOperation`
    /// checkpoint and later fed back into [`ReplayableRng::from_seed`].
    pub fn seed(&self) -> u64 {
        self.state
    }

    fn next_raw(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// A uniformly distributed value in `[0, bound)`. `bound` must be > 0.
    pub fn next_bounded(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0, "next_bounded requires a positive bound");
        self.next_raw() % bound
    }

    /// A uniform sample in `[0.0, 1.0)`, used by the legacy driver's
    /// operation-mix selection.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_raw() >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl RngCore for ReplayableRng {
    fn next_u32(&mut self) -> u32 {
        (self.next_raw() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_raw()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(8);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_raw().to_le_bytes());
        }
        let rem = chunks.into_remainder();
        if !rem.is_empty() {
            let bytes = self.next_raw().to_le_bytes();
            rem.copy_from_slice(&bytes[..rem.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
