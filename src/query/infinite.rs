//! Cursor-paginated queries
//!
//! Pages are requested with the id of the last document of the previous
//! page. The first page has no cursor. A page with no documents means there
//! is nothing after it.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Mutex, watch};

use super::client::QueryClient;
use super::key::QueryKey;
use super::observer::{MountHandle, QueryObserver, QueryOptions, QueryState};
use crate::error::QueryError;
use crate::models::{Document, DocumentList};

/// Gateway call fetching the page after `cursor`
pub type PageFetcher<T> =
    Arc<dyn Fn(Option<String>) -> BoxFuture<'static, crate::error::Result<DocumentList<T>>> + Send + Sync>;

/// Every page loaded so far, with the cursor each was requested with
#[derive(Debug, Clone, PartialEq)]
pub struct InfiniteData<T> {
    pub pages: Vec<DocumentList<T>>,
    pub page_params: Vec<Option<String>>,
}

impl<T> Default for InfiniteData<T> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

impl<T: Document> InfiniteData<T> {
    /// Cursor for the page after the last loaded one
    pub fn next_page_param(&self) -> Option<String> {
        self.pages.last().and_then(next_page_param)
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_param().is_some()
    }

    /// All documents across pages, in order
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.documents.iter())
    }
}

/// Cursor following `last_page`, or `None` when it was empty
pub fn next_page_param<T: Document>(last_page: &DocumentList<T>) -> Option<String> {
    last_page
        .documents
        .last()
        .map(|document| document.id().to_string())
}

/// Load up to `page_count` pages starting from the first
async fn fetch_pages<T: Document>(
    fetch_page: &PageFetcher<T>,
    page_count: usize,
) -> crate::error::Result<InfiniteData<T>> {
    let mut data = InfiniteData::default();
    let mut cursor = None;

    for _ in 0..page_count.max(1) {
        let page = fetch_page(cursor.clone()).await?;
        let next = next_page_param(&page);
        data.page_params.push(cursor);
        data.pages.push(page);

        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(data)
}

/// Observer of a paginated read
///
/// Loading or refetching walks pages from the first; `fetch_next_page`
/// appends one page. Refetching after invalidation reloads as many pages as
/// were loaded before.
pub struct InfiniteQueryObserver<T> {
    query: QueryObserver<InfiniteData<T>>,
    fetch_page: PageFetcher<T>,
    next_page: Arc<Mutex<()>>,
}

impl<T> Clone for InfiniteQueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            fetch_page: self.fetch_page.clone(),
            next_page: self.next_page.clone(),
        }
    }
}

impl<T> InfiniteQueryObserver<T>
where
    T: Document + Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(client: QueryClient, key: QueryKey, fetch_page: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<DocumentList<T>>> + Send + 'static,
    {
        let fetch_page: PageFetcher<T> = Arc::new(move |cursor| fetch_page(cursor).boxed());
        let options = Self::options(client.clone(), key, fetch_page.clone());

        Self {
            query: QueryObserver::new(client, options),
            fetch_page,
            next_page: Arc::new(Mutex::new(())),
        }
    }

    fn options(
        client: QueryClient,
        key: QueryKey,
        fetch_page: PageFetcher<T>,
    ) -> QueryOptions<InfiniteData<T>> {
        let cache_key = key.clone();
        QueryOptions::new(key, move || {
            let client = client.clone();
            let key = cache_key.clone();
            let fetch_page = fetch_page.clone();
            async move {
                let loaded = client
                    .get_query_data::<InfiniteData<T>>(&key)
                    .await
                    .map_or(1, |data| data.pages.len());
                fetch_pages(&fetch_page, loaded).await
            }
        })
    }

    pub fn state(&self) -> QueryState<InfiniteData<T>> {
        self.query.state()
    }

    pub fn data(&self) -> Option<InfiniteData<T>> {
        self.query.data()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<InfiniteData<T>>> {
        self.query.subscribe()
    }

    /// False until the first page is loaded, and after an empty page
    pub fn has_next_page(&self) -> bool {
        self.data().is_some_and(|data| data.has_next_page())
    }

    /// Load the first page (or the cached pages)
    pub async fn fetch(&self) -> QueryState<InfiniteData<T>> {
        self.query.fetch().await
    }

    /// Reload every loaded page from the gateway
    pub async fn refetch(&self) -> QueryState<InfiniteData<T>> {
        self.query.refetch().await
    }

    /// Append the page after the last loaded one
    ///
    /// Does nothing when the last page was empty. Loads the first page when
    /// nothing is loaded yet.
    pub async fn fetch_next_page(&self) -> QueryState<InfiniteData<T>> {
        let _guard = self.next_page.lock().await;
        let key = self.query.key().await;

        let current = match self.query.client().get_query_data::<InfiniteData<T>>(&key).await {
            Some(data) => data,
            None => match self.query.data() {
                Some(data) => data,
                None => return self.query.fetch().await,
            },
        };

        let Some(cursor) = current.next_page_param() else {
            tracing::debug!(key = %key, pages = current.pages.len(), "No further pages");
            return self.query.state();
        };

        self.query.mark_fetching();
        tracing::debug!(key = %key, cursor = %cursor, "Fetching next page");
        match (self.fetch_page)(Some(cursor.clone())).await {
            Ok(page) => {
                let mut next = current;
                next.pages.push(page);
                next.page_params.push(Some(cursor));
                self.query
                    .client()
                    .set_query_data(&key, next.clone())
                    .await;
                self.query.apply(Ok(next));
            }
            Err(error) => self.query.apply(Err(QueryError::from(error))),
        }
        self.query.state()
    }

    /// Load pages until `page_count` are loaded or there are no more
    ///
    /// Stops at the first failed request instead of asking again.
    pub async fn load_pages(&self, page_count: usize) -> QueryState<InfiniteData<T>> {
        let mut state = self.fetch().await;
        while !state.is_error()
            && self.has_next_page()
            && state.data.as_ref().map_or(0, |data| data.pages.len()) < page_count
        {
            state = self.fetch_next_page().await;
        }
        state
    }

    pub fn mount(&self) -> MountHandle {
        self.query.mount()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(&'static str);

    impl Document for Item {
        fn id(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn cursor_is_last_document_id() {
        let page = DocumentList::new(vec![Item("a"), Item("b")]);
        assert_eq!(next_page_param(&page).as_deref(), Some("b"));
    }

    #[test]
    fn empty_page_ends_pagination() {
        let data = InfiniteData {
            pages: vec![DocumentList::new(vec![Item("a")]), DocumentList::new(Vec::new())],
            page_params: vec![None, Some("a".to_string())],
        };
        assert!(!data.has_next_page());
        assert_eq!(data.items().count(), 1);
    }

    #[tokio::test]
    async fn fetch_pages_stops_at_empty_page() {
        let requested = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = requested.clone();
        let fetch_page: PageFetcher<Item> = Arc::new(move |cursor: Option<String>| {
            log.lock().unwrap().push(cursor.clone());
            async move {
                Ok::<_, crate::error::AppError>(match cursor.as_deref() {
                    None => DocumentList::new(vec![Item("a"), Item("b")]),
                    Some("b") => DocumentList::new(vec![Item("c")]),
                    _ => DocumentList::new(Vec::new()),
                })
            }
            .boxed()
        });

        let data = fetch_pages(&fetch_page, 5).await.unwrap();

        assert_eq!(data.pages.len(), 3);
        assert_eq!(
            *requested.lock().unwrap(),
            vec![None, Some("b".to_string()), Some("c".to_string())]
        );
        assert!(!data.has_next_page());
    }
}
