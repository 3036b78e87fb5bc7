//! Time-bounded memoization of upstream responses.
//!
//! [`CachedClient`] wraps an [`HttpTransport`] so that identical requests made
//! within a freshness window are answered from memory. Freshness is decided
//! at lookup time: an entry is served when it is younger than the ttl the
//! caller asks for *and* younger than the ttl it was written with. The backing
//! Moka store evicts entries once their write ttl elapses and bounds memory
//! with a maximum capacity.
//!
//! Only 2xx responses are stored. Other statuses and transport failures are
//! returned to the caller and the next call tries upstream again.

use std::future::Future;
use std::time::Duration;

use moka::Expiry;
use moka::future::Cache;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::upstream::{HttpTransport, UpstreamRequest, UpstreamResponse};

/// Default maximum number of cached responses.
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Tuning for the response store.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

/// A response together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response: UpstreamResponse,
    pub from_cache: bool,
}

#[derive(Clone)]
struct CacheEntry {
    response: UpstreamResponse,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh_for(&self, ttl: Duration) -> bool {
        let age = self.fetched_at.elapsed();
        age < ttl && age < self.ttl
    }
}

/// Evicts each entry once the ttl it was written with has elapsed.
struct WriteTtl;

impl Expiry<UpstreamRequest, CacheEntry> for WriteTtl {
    fn expire_after_create(
        &self,
        _key: &UpstreamRequest,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &UpstreamRequest,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// HTTP client with a shared response cache.
///
/// Clones share the same store, so one client can be handed to every
/// handler and connection task.
#[derive(Clone)]
pub struct CachedClient<T> {
    transport: T,
    store: Cache<UpstreamRequest, CacheEntry>,
    caching: bool,
}

impl<T: HttpTransport> CachedClient<T> {
    /// Create a client over `transport` with an empty store.
    pub fn new(transport: T, settings: CacheSettings) -> Self {
        let store = Cache::builder()
            .max_capacity(settings.max_capacity)
            .expire_after(WriteTtl)
            .build();

        Self {
            transport,
            store,
            caching: true,
        }
    }

    /// GET `url`, reusing a cached response younger than `ttl`.
    pub async fn get(&self, url: &str, ttl: Duration) -> Result<CachedResponse> {
        self.fetch(UpstreamRequest::get(url), ttl).await
    }

    /// GET `url` without reading or writing the cache.
    pub async fn get_bypass(&self, url: &str) -> Result<CachedResponse> {
        self.cache_disabled()
            .fetch(UpstreamRequest::get(url), Duration::ZERO)
            .await
    }

    /// Perform `request`, reusing a cached response younger than `ttl`.
    pub async fn fetch(&self, request: UpstreamRequest, ttl: Duration) -> Result<CachedResponse> {
        if self.caching
            && let Some(entry) = self.store.get(&request).await
            && entry.is_fresh_for(ttl)
        {
            metrics::counter!("apiproxy_cache_hits_total").increment(1);
            debug!(url = %request.url(), "cache hit");
            return Ok(CachedResponse {
                response: entry.response,
                from_cache: true,
            });
        }

        metrics::counter!("apiproxy_cache_misses_total").increment(1);
        debug!(url = %request.url(), caching = self.caching, "cache miss");
        let response = self.transport.execute(&request).await?;

        if self.caching && response.is_success() && !ttl.is_zero() {
            let entry = CacheEntry {
                response: response.clone(),
                fetched_at: Instant::now(),
                ttl,
            };
            self.store.insert(request, entry).await;
        }

        Ok(CachedResponse {
            response,
            from_cache: false,
        })
    }

    /// A view of this client that neither reads nor writes the cache.
    ///
    /// The receiver is left untouched, so normal caching resumes as soon as
    /// the view is dropped, whatever the outcome of the calls made with it.
    #[must_use]
    pub fn cache_disabled(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            store: self.store.clone(),
            caching: false,
        }
    }

    /// Run `call` with a non-caching view of this client.
    pub async fn with_cache_disabled<F, Fut, R>(&self, call: F) -> R
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = R>,
    {
        call(self.cache_disabled()).await
    }

    /// Whether this view reads and writes the cache.
    pub const fn is_caching(&self) -> bool {
        self.caching
    }

    /// Approximate number of stored responses.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }
}
