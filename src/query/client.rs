//! Query cache store
//!
//! Owns every cached read result, keyed by `QueryKey`. The store is volatile
//! and disposable: the backend owns the data, the cache only knows which
//! results are fresh, which are stale, and which fetches are in flight.
//! Uses Moka for the underlying concurrent storage.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use tokio::sync::{Mutex, broadcast};

use super::key::{QueryFilter, QueryKey};
use crate::config::CacheConfig;
use crate::error::QueryError;
use crate::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE, DEDUPLICATED_FETCHES_TOTAL,
    INVALIDATIONS_TOTAL, QUERY_FETCHES_TOTAL, QUERY_FETCH_DURATION_SECONDS,
};

/// Capacity of the cache event channel
const EVENT_CAPACITY: usize = 256;

type CachedValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, QueryError>>>;

// =============================================================================
// Entries
// =============================================================================

/// One cached read result
#[derive(Clone)]
struct CachedQuery {
    value: CachedValue,
    fetched_at: Instant,
    /// Set by invalidation; the value stays readable until refetched
    invalidated: bool,
}

impl CachedQuery {
    fn fresh(value: CachedValue) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            invalidated: false,
        }
    }

    fn is_fresh(&self, stale_time: Duration) -> bool {
        !self.invalidated && self.fetched_at.elapsed() < stale_time
    }

    fn invalidate(mut self) -> Self {
        self.invalidated = true;
        self
    }
}

/// A gateway call shared by every reader of the same key
struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// Change notification broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Entries matching the filter were marked stale
    Invalidated(QueryFilter),
    /// A fresh result was stored under the key
    Updated(QueryKey),
    /// Every entry was dropped
    Cleared,
}

// =============================================================================
// Query Client
// =============================================================================

/// Cache tuning
#[derive(Debug, Clone)]
pub struct QueryClientOptions {
    /// Maximum number of cached results
    pub max_entries: u64,
    /// How long a fetched result is served without refetching
    pub stale_time: Duration,
    /// How long an unread result is kept
    pub gc_time: Duration,
}

impl Default for QueryClientOptions {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for QueryClientOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            stale_time: config.stale_time(),
            gc_time: config.gc_time(),
        }
    }
}

/// Query cache shared by all observers and mutations
///
/// Cheap to clone; clones share the same store. Created once at startup and
/// passed to every query and mutation rather than living in a global.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// QueryKey -> cached result
    store: Cache<QueryKey, CachedQuery>,
    /// QueryKey -> fetch currently running for it
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
    next_fetch_id: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
    stale_time: Duration,
}

impl QueryClient {
    /// Create new query client
    pub fn new(options: QueryClientOptions) -> Self {
        let store = Cache::builder()
            .max_capacity(options.max_entries)
            .time_to_idle(options.gc_time)
            .build();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(ClientInner {
                store,
                in_flight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(1),
                events,
                stale_time: options.stale_time,
            }),
        }
    }

    /// Receive cache events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Read through the cache
    ///
    /// Returns the cached result when it is fresh. Otherwise runs `fetcher`,
    /// unless a fetch for the same key is already running, in which case
    /// this call waits for that one instead.
    pub async fn fetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        let tag = key.tag().as_str();
        if let Some(cached) = self.inner.store.get(key).await {
            if cached.is_fresh(self.inner.stale_time) {
                CACHE_HITS_TOTAL.with_label_values(&[tag]).inc();
                tracing::trace!(key = %key, "Query cache hit");
                return downcast(key, &cached.value);
            }
        }
        CACHE_MISSES_TOTAL.with_label_values(&[tag]).inc();

        self.fetch_from_gateway(key, fetcher).await
    }

    /// Fetch regardless of freshness, still sharing an in-flight fetch
    pub async fn refetch_query<T, F, Fut>(
        &self,
        key: &QueryKey,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        self.fetch_from_gateway(key, fetcher).await
    }

    async fn fetch_from_gateway<T, F, Fut>(
        &self,
        key: &QueryKey,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        let (fetch_id, fetch) = self.join_or_start(key, fetcher).await;
        let result = fetch.await;
        self.settle(key, fetch_id, &result).await;

        let value = result?;
        downcast(key, &value)
    }

    async fn join_or_start<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> (u64, SharedFetch)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(existing) = in_flight.get(key) {
            DEDUPLICATED_FETCHES_TOTAL
                .with_label_values(&[key.tag().as_str()])
                .inc();
            tracing::debug!(key = %key, "Joining in-flight fetch");
            return (existing.id, existing.fetch.clone());
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let tag = key.tag();
        let pending = fetcher();
        let fetch = async move {
            let started = Instant::now();
            let result = pending.await;
            QUERY_FETCH_DURATION_SECONDS
                .with_label_values(&[tag.as_str()])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(value) => {
                    QUERY_FETCHES_TOTAL
                        .with_label_values(&[tag.as_str(), "success"])
                        .inc();
                    Ok(Arc::new(value) as CachedValue)
                }
                Err(error) => {
                    QUERY_FETCHES_TOTAL
                        .with_label_values(&[tag.as_str(), "error"])
                        .inc();
                    tracing::warn!(query = %tag, %error, "Query fetch failed");
                    Err(QueryError::from(error))
                }
            }
        }
        .boxed()
        .shared();

        tracing::debug!(key = %key, fetch_id = id, "Starting fetch");
        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        (id, fetch)
    }

    /// Store a finished fetch, unless it was superseded
    ///
    /// Only the fetch still registered for the key may write. Invalidation,
    /// removal and clearing drop the registration, so results that were in
    /// flight across those calls are handed to their waiters but never cached.
    async fn settle(&self, key: &QueryKey, fetch_id: u64, result: &Result<CachedValue, QueryError>) {
        let mut in_flight = self.inner.in_flight.lock().await;
        let is_current = in_flight
            .get(key)
            .is_some_and(|running| running.id == fetch_id);
        if !is_current {
            return;
        }
        in_flight.remove(key);

        if let Ok(value) = result {
            self.inner
                .store
                .insert(key.clone(), CachedQuery::fresh(value.clone()))
                .await;
            CACHE_SIZE.set(self.inner.store.entry_count() as i64);
            let _ = self.inner.events.send(CacheEvent::Updated(key.clone()));
        }
    }

    /// Cached value under the key, fresh or stale
    pub async fn get_query_data<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cached = self.inner.store.get(key).await?;
        cached.value.downcast_ref::<T>().cloned()
    }

    /// Replace the cached value under the key
    pub async fn set_query_data<T>(&self, key: &QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .store
            .insert(key.clone(), CachedQuery::fresh(Arc::new(value)))
            .await;
        CACHE_SIZE.set(self.inner.store.entry_count() as i64);
        let _ = self.inner.events.send(CacheEvent::Updated(key.clone()));
    }

    /// Whether the next read of this key goes to the gateway
    pub async fn is_stale(&self, key: &QueryKey) -> bool {
        match self.inner.store.get(key).await {
            Some(cached) => !cached.is_fresh(self.inner.stale_time),
            None => true,
        }
    }

    /// Mark every matching entry stale and notify observers
    ///
    /// Cached values stay readable until refetched. Fetches in flight for
    /// matching keys are detached so their results are not written back.
    /// Returns the number of cached entries marked.
    pub async fn invalidate_queries(&self, filter: impl Into<QueryFilter>) -> usize {
        let filter = filter.into();
        let mut in_flight = self.inner.in_flight.lock().await;
        in_flight.retain(|key, _| !filter.matches(key));

        let matching: Vec<(Arc<QueryKey>, CachedQuery)> = self
            .inner
            .store
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .collect();
        let marked = matching.len();
        for (key, cached) in matching {
            self.inner
                .store
                .insert(key.as_ref().clone(), cached.invalidate())
                .await;
        }
        drop(in_flight);

        INVALIDATIONS_TOTAL
            .with_label_values(&[filter.key().tag().as_str()])
            .inc();
        tracing::debug!(filter = %filter, marked, "Invalidated queries");
        let _ = self.inner.events.send(CacheEvent::Invalidated(filter));
        marked
    }

    /// Drop every matching entry without notifying observers
    pub async fn remove_queries(&self, filter: impl Into<QueryFilter>) {
        let filter = filter.into();
        let mut in_flight = self.inner.in_flight.lock().await;
        in_flight.retain(|key, _| !filter.matches(key));

        let matching: Vec<Arc<QueryKey>> = self
            .inner
            .store
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, _)| key)
            .collect();
        for key in matching {
            self.inner.store.invalidate(key.as_ref()).await;
        }
        CACHE_SIZE.set(self.inner.store.entry_count() as i64);
    }

    /// Drop everything, e.g. on sign-out
    pub async fn clear(&self) {
        let mut in_flight = self.inner.in_flight.lock().await;
        in_flight.clear();
        self.inner.store.invalidate_all();
        drop(in_flight);

        CACHE_SIZE.set(0);
        tracing::info!("Cleared query cache");
        let _ = self.inner.events.send(CacheEvent::Cleared);
    }

    /// Keys currently cached
    pub fn cached_keys(&self) -> Vec<QueryKey> {
        self.inner
            .store
            .iter()
            .map(|(key, _)| key.as_ref().clone())
            .collect()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryClientOptions::default())
    }
}

fn downcast<T>(key: &QueryKey, value: &CachedValue) -> Result<T, QueryError>
where
    T: Clone + 'static,
{
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| QueryError::TypeMismatch(key.clone()))
}
