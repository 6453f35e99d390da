//! Offline caching layer for the status feed and its static assets.
//!
//! This module provides the two cache partitions and their retrieval
//! strategies:
//! - Cache-first for versioned static assets, with an offline fallback
//!   document for navigation requests
//! - Network-first with a TTL-governed cache fallback for API responses
//! - Network-first with a plain fallback for anything else
//!
//! Partitions are generation-named; activating a new generation drops all
//! older ones.

mod layer;
mod storage;
mod traits;

pub use layer::CacheManager;
pub use storage::{CacheStore, NoopStore, SqliteStore, StoredEntry};
pub use traits::{classify, ApiFetch, QueryKey, RequestClass};
