//! Single-flight TTL memoization for keyed asynchronous fetches.

pub mod single_flight;

pub use single_flight::{CacheConfig, CacheStats, SingleFlightCache};
