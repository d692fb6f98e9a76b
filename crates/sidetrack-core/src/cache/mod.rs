//! Local caching for offline viewing.
//!
//! The `CacheManager` keeps the last fetched projects, commit lists and
//! dashboard as JSON under the user's cache directory. Data is considered
//! stale after 60 minutes; the CLI falls back to it when the API is
//! unreachable.

pub mod manager;

pub use manager::{CacheManager, CachedData};
