//! In-process report cache.
//!
//! Entries live for a fixed TTL behind an LRU bound. Concurrent misses on the
//! same key share a single computation whose result (or error) every caller
//! observes.

mod config;
mod lock;
mod store;

pub use config::CacheConfig;
pub use store::{FlightError, TtlCache};
