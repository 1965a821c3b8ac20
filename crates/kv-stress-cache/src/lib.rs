#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **kv-stress-cache** – the cache backend contract the stressor core
//! consumes (spec §6).
//!
//! This crate only defines the trait and the typed envelope around stored
//! values; `kv-stress-cache-memory` provides an in-memory implementation
//! used by tests and local runs, and other drivers can plug in against the
//! same trait without touching the core logic.

mod backend;
mod error;
mod key;
mod value;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use value::{CheckerWatermark, LastOperation, StoredValue};
