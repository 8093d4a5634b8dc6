//! Query observers
//!
//! An observer is one consumer's view of a cached read: the options it reads
//! with, and the state (data / error / flags) it last saw. Mounting an
//! observer keeps it in sync with the cache: it refetches when its key is
//! invalidated and when its options change.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;

use super::client::{CacheEvent, QueryClient};
use super::key::{QueryFilter, QueryKey};
use crate::error::QueryError;

/// Gateway call producing a query result
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, crate::error::Result<T>> + Send + Sync>;

// =============================================================================
// Options
// =============================================================================

/// What to read and whether reading is allowed
///
/// Options built without their required parameter are disabled: they carry
/// a key but no fetcher, and the gateway is never called for them.
pub struct QueryOptions<T> {
    key: QueryKey,
    fetcher: Option<Fetcher<T>>,
    enabled: bool,
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            enabled: self.enabled,
        }
    }
}

impl<T: 'static> QueryOptions<T> {
    pub fn new<F, Fut>(key: QueryKey, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        Self {
            key,
            fetcher: Some(Arc::new(move || fetcher().boxed())),
            enabled: true,
        }
    }

    /// Options that never fetch
    pub fn disabled(key: QueryKey) -> Self {
        Self {
            key,
            fetcher: None,
            enabled: false,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.fetcher.is_some()
    }

    fn active_fetcher(&self) -> Option<Fetcher<T>> {
        if self.enabled {
            self.fetcher.clone()
        } else {
            None
        }
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No data yet
    Pending,
    Success,
    Error,
}

/// What a consumer renders from
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    /// Last successful result; kept while refetching and after errors
    pub data: Option<T>,
    pub error: Option<QueryError>,
    pub status: QueryStatus,
    /// A gateway call for this observer is running
    pub is_fetching: bool,
    pub data_updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Pending,
            is_fetching: false,
            data_updated_at: None,
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// First load in progress
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub(crate) fn apply(&mut self, result: Result<T, QueryError>) {
        self.is_fetching = false;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                self.status = QueryStatus::Success;
                self.data_updated_at = Some(Utc::now());
            }
            Err(error) => {
                self.error = Some(error);
                self.status = QueryStatus::Error;
            }
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// One consumer of a cached read
///
/// Clones share the same options and state.
pub struct QueryObserver<T> {
    shared: Arc<ObserverShared<T>>,
}

impl<T> Clone for QueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct ObserverShared<T> {
    client: QueryClient,
    target: Mutex<Target<T>>,
    state: watch::Sender<QueryState<T>>,
    retargeted: Notify,
}

struct Target<T> {
    options: QueryOptions<T>,
    /// Bumped whenever options change; results fetched under an older
    /// generation are dropped
    generation: u64,
}

impl<T> QueryObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(client: QueryClient, options: QueryOptions<T>) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            shared: Arc::new(ObserverShared {
                client,
                target: Mutex::new(Target {
                    options,
                    generation: 0,
                }),
                state,
                retargeted: Notify::new(),
            }),
        }
    }

    pub fn client(&self) -> &QueryClient {
        &self.shared.client
    }

    pub fn state(&self) -> QueryState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.shared.state.borrow().data.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.shared.state.subscribe()
    }

    pub async fn key(&self) -> QueryKey {
        self.shared.target.lock().await.options.key.clone()
    }

    pub async fn is_enabled(&self) -> bool {
        self.shared.target.lock().await.options.is_enabled()
    }

    /// Point the observer at new options
    ///
    /// Any fetch still running for the old options will not touch this
    /// observer's state. A mounted observer fetches with the new options
    /// right away.
    pub async fn set_options(&self, options: QueryOptions<T>) {
        let mut target = self.shared.target.lock().await;
        let key_changed = target.options.key != options.key;
        target.generation += 1;
        target.options = options;
        drop(target);

        if key_changed {
            self.shared.state.send_replace(QueryState::default());
        } else {
            self.shared.state.send_modify(|state| state.is_fetching = false);
        }
        self.shared.retargeted.notify_one();
    }

    /// Read through the cache
    pub async fn fetch(&self) -> QueryState<T> {
        self.run(false).await
    }

    /// Read from the gateway even if the cached result is fresh
    pub async fn refetch(&self) -> QueryState<T> {
        self.run(true).await
    }

    async fn run(&self, force: bool) -> QueryState<T> {
        let (generation, options) = {
            let target = self.shared.target.lock().await;
            (target.generation, target.options.clone())
        };
        let Some(fetcher) = options.active_fetcher() else {
            tracing::trace!(key = %options.key, "Query disabled; skipping fetch");
            return self.state();
        };

        self.shared.state.send_modify(|state| state.is_fetching = true);
        let key = options.key;
        let fetch = move || fetcher();
        let result = if force {
            self.shared.client.refetch_query(&key, fetch).await
        } else {
            self.shared.client.fetch_query(&key, fetch).await
        };

        if !self.is_current(generation).await {
            tracing::debug!(key = %key, "Discarding result for superseded query");
            return self.state();
        }
        self.shared.state.send_modify(|state| state.apply(result));
        self.state()
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.shared.target.lock().await.generation == generation
    }

    pub(crate) fn mark_fetching(&self) {
        self.shared.state.send_modify(|state| state.is_fetching = true);
    }

    pub(crate) fn apply(&self, result: Result<T, QueryError>) {
        self.shared.state.send_modify(|state| state.apply(result));
    }

    async fn watches(&self, filter: &QueryFilter) -> bool {
        let target = self.shared.target.lock().await;
        target.options.is_enabled() && filter.matches(&target.options.key)
    }

    /// Take a result another reader stored under our key
    async fn sync_from_cache(&self, updated: &QueryKey) {
        let generation = {
            let target = self.shared.target.lock().await;
            if !target.options.is_enabled() || &target.options.key != updated {
                return;
            }
            target.generation
        };

        if let Some(data) = self.shared.client.get_query_data::<T>(updated).await {
            if self.is_current(generation).await {
                self.shared.state.send_modify(|state| {
                    let is_fetching = state.is_fetching;
                    state.apply(Ok(data));
                    state.is_fetching = is_fetching;
                });
            }
        }
    }

    /// Keep this observer live until the handle is dropped
    ///
    /// Fetches once, then refetches whenever an invalidation matches the
    /// observer's key, the cache is cleared, or the options change.
    pub fn mount(&self) -> MountHandle {
        let observer = self.clone();
        let mut events = self.shared.client.subscribe();

        let handle = tokio::spawn(async move {
            observer.fetch().await;
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(CacheEvent::Invalidated(filter)) => {
                            if observer.watches(&filter).await {
                                observer.fetch().await;
                            }
                        }
                        Ok(CacheEvent::Updated(key)) => observer.sync_from_cache(&key).await,
                        Ok(CacheEvent::Cleared) => {
                            observer.shared.state.send_replace(QueryState::default());
                            observer.fetch().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Observer lagged behind cache events; refetching");
                            observer.fetch().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = observer.shared.retargeted.notified() => {
                        observer.fetch().await;
                    }
                }
            }
        });

        MountHandle { handle }
    }
}

/// Keeps an observer mounted; dropping it unmounts
///
/// Unmounting cancels any fetch the observer task is waiting on, so its
/// result is never applied to the observer.
pub struct MountHandle {
    handle: JoinHandle<()>,
}

impl MountHandle {
    pub fn unmount(self) {}

    pub fn is_mounted(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::query::{QueryClientOptions, QueryTag};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_options(calls: &Arc<AtomicUsize>, id: &str) -> QueryOptions<String> {
        let calls = calls.clone();
        let value = id.to_string();
        QueryOptions::new(QueryKey::new(QueryTag::GetPostById).with(id), move || {
            let calls = calls.clone();
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(value)
            }
        })
    }

    #[tokio::test]
    async fn disabled_options_never_fetch() {
        let client = QueryClient::new(QueryClientOptions::default());
        let observer: QueryObserver<String> = QueryObserver::new(
            client,
            QueryOptions::disabled(QueryKey::new(QueryTag::GetPostById)),
        );

        let state = observer.fetch().await;

        assert!(state.is_pending());
        assert!(!state.is_fetching);
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn enabled_flag_gates_fetch() {
        let client = QueryClient::new(QueryClientOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let observer = QueryObserver::new(client, counting_options(&calls, "p1").enabled(false));

        observer.fetch().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        observer
            .set_options(counting_options(&calls, "p1").enabled(true))
            .await;
        let state = observer.fetch().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.data.as_deref(), Some("p1"));
        assert!(state.is_success());
    }

    #[tokio::test]
    async fn superseded_result_is_dropped() {
        let client = QueryClient::new(QueryClientOptions::default());
        let slow = QueryOptions::new(QueryKey::new(QueryTag::GetPostById).with("p1"), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, AppError>("p1".to_string())
        });
        let observer = QueryObserver::new(client, slow);

        let (state, _) = tokio::join!(observer.fetch(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            observer
                .set_options(QueryOptions::disabled(QueryKey::new(QueryTag::GetPostById)))
                .await;
        });

        assert!(state.data.is_none());
        assert!(observer.data().is_none());
    }

    #[tokio::test]
    async fn errors_keep_previous_data() {
        let mut state = QueryState::default();
        state.apply(Ok("cached".to_string()));
        state.apply(Err(QueryError::from(AppError::NotFound)));

        assert!(state.is_error());
        assert_eq!(state.data.as_deref(), Some("cached"));
    }
}
