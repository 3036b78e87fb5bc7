//! Response caching for upstream requests.

pub mod response_cache;

pub use response_cache::{CacheSettings, CachedClient, CachedResponse};
