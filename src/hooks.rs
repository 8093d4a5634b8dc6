//! Application queries and mutations
//!
//! One constructor per backend operation the UI uses. Reads come back as
//! observers keyed by [`QueryTag`], writes as mutations bound to their
//! post-commit policy. Everything shares the state's [`QueryClient`].

use std::sync::Arc;

use crate::AppState;
use crate::error::{AppError, QueryError};
use crate::gateway::Gateway;
use crate::models::{
    Credentials, DeletePost, LikePost, NewPost, NewUser, Post, SavePost, SaveRecord, Session,
    UpdatePost, UpdateUser, User,
};
use crate::query::{
    InfiniteQueryObserver, Mutation, MutationKind, QueryKey, QueryObserver, QueryTag,
};

/// Query options for every read
///
/// Builders taking an optional or free-text parameter return disabled
/// options while the parameter is missing or empty.
pub mod options {
    use std::sync::Arc;

    use crate::gateway::Gateway;
    use crate::models::{Post, User};
    use crate::query::{QueryKey, QueryOptions, QueryTag};

    /// Enabled options when `param` is present and non-empty
    fn with_param<T, F>(tag: QueryTag, param: Option<&str>, build: F) -> QueryOptions<T>
    where
        T: 'static,
        F: FnOnce(QueryKey, String) -> QueryOptions<T>,
    {
        match param.filter(|value| !value.trim().is_empty()) {
            Some(value) => build(QueryKey::new(tag).with(value), value.to_string()),
            None => QueryOptions::disabled(QueryKey::new(tag)),
        }
    }

    pub fn current_user(gateway: &Arc<dyn Gateway>) -> QueryOptions<User> {
        let gateway = gateway.clone();
        QueryOptions::new(QueryKey::new(QueryTag::GetCurrentUser), move || {
            let gateway = gateway.clone();
            async move { gateway.get_current_user().await }
        })
    }

    pub fn recent_posts(gateway: &Arc<dyn Gateway>) -> QueryOptions<Vec<Post>> {
        let gateway = gateway.clone();
        QueryOptions::new(QueryKey::new(QueryTag::GetRecentPosts), move || {
            let gateway = gateway.clone();
            async move { gateway.get_recent_posts().await }
        })
    }

    pub fn post_by_id(gateway: &Arc<dyn Gateway>, post_id: Option<&str>) -> QueryOptions<Post> {
        with_param(QueryTag::GetPostById, post_id, |key, post_id| {
            let gateway = gateway.clone();
            QueryOptions::new(key, move || {
                let gateway = gateway.clone();
                let post_id = post_id.clone();
                async move { gateway.get_post_by_id(&post_id).await }
            })
        })
    }

    pub fn user_posts(gateway: &Arc<dyn Gateway>, user_id: Option<&str>) -> QueryOptions<Vec<Post>> {
        with_param(QueryTag::GetUserPosts, user_id, |key, user_id| {
            let gateway = gateway.clone();
            QueryOptions::new(key, move || {
                let gateway = gateway.clone();
                let user_id = user_id.clone();
                async move { gateway.get_user_posts(&user_id).await }
            })
        })
    }

    /// Disabled while the search term is blank
    pub fn search_posts(gateway: &Arc<dyn Gateway>, term: &str) -> QueryOptions<Vec<Post>> {
        with_param(QueryTag::SearchPosts, Some(term), |key, term| {
            let gateway = gateway.clone();
            QueryOptions::new(key, move || {
                let gateway = gateway.clone();
                let term = term.clone();
                async move { gateway.search_posts(&term).await }
            })
        })
    }

    pub fn user_by_id(gateway: &Arc<dyn Gateway>, user_id: Option<&str>) -> QueryOptions<User> {
        with_param(QueryTag::GetUserById, user_id, |key, user_id| {
            let gateway = gateway.clone();
            QueryOptions::new(key, move || {
                let gateway = gateway.clone();
                let user_id = user_id.clone();
                async move { gateway.get_user_by_id(&user_id).await }
            })
        })
    }

    /// All users, newest first; `limit` becomes part of the key
    pub fn users(gateway: &Arc<dyn Gateway>, limit: Option<u32>) -> QueryOptions<Vec<User>> {
        let key = match limit {
            Some(limit) => QueryKey::new(QueryTag::GetUsers).with(limit.to_string()),
            None => QueryKey::new(QueryTag::GetUsers),
        };
        let gateway = gateway.clone();
        QueryOptions::new(key, move || {
            let gateway = gateway.clone();
            async move { gateway.get_users(limit).await }
        })
    }
}

fn gateway_mutation<I, O, F, Fut>(state: &AppState, kind: MutationKind, run: F) -> Mutation<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
    F: Fn(Arc<dyn Gateway>, I) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = crate::error::Result<O>> + Send + 'static,
{
    let gateway = state.gateway.clone();
    Mutation::new(state.query_client.clone(), kind, move |input| {
        run(gateway.clone(), input)
    })
}

impl AppState {
    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn current_user(&self) -> QueryObserver<User> {
        QueryObserver::new(
            self.query_client.clone(),
            options::current_user(&self.gateway),
        )
    }

    pub fn recent_posts(&self) -> QueryObserver<Vec<Post>> {
        QueryObserver::new(
            self.query_client.clone(),
            options::recent_posts(&self.gateway),
        )
    }

    /// The paginated home feed
    pub fn infinite_posts(&self) -> InfiniteQueryObserver<Post> {
        let gateway = self.gateway.clone();
        InfiniteQueryObserver::new(
            self.query_client.clone(),
            QueryKey::new(QueryTag::GetInfinitePosts),
            move |cursor| {
                let gateway = gateway.clone();
                async move { gateway.get_infinite_posts(cursor).await }
            },
        )
    }

    pub fn post_by_id(&self, post_id: Option<&str>) -> QueryObserver<Post> {
        QueryObserver::new(
            self.query_client.clone(),
            options::post_by_id(&self.gateway, post_id),
        )
    }

    pub fn user_posts(&self, user_id: Option<&str>) -> QueryObserver<Vec<Post>> {
        QueryObserver::new(
            self.query_client.clone(),
            options::user_posts(&self.gateway, user_id),
        )
    }

    pub fn search_posts(&self, term: &str) -> QueryObserver<Vec<Post>> {
        QueryObserver::new(
            self.query_client.clone(),
            options::search_posts(&self.gateway, term),
        )
    }

    pub fn user_by_id(&self, user_id: Option<&str>) -> QueryObserver<User> {
        QueryObserver::new(
            self.query_client.clone(),
            options::user_by_id(&self.gateway, user_id),
        )
    }

    pub fn users(&self, limit: Option<u32>) -> QueryObserver<Vec<User>> {
        QueryObserver::new(
            self.query_client.clone(),
            options::users(&self.gateway, limit),
        )
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    pub fn create_user_account(&self) -> Mutation<NewUser, User> {
        gateway_mutation(self, MutationKind::CreateUserAccount, |gateway, user: NewUser| async move {
            gateway.create_user_account(&user).await
        })
    }

    pub fn sign_in_account(&self) -> Mutation<Credentials, Session> {
        gateway_mutation(self, MutationKind::SignInAccount, |gateway, credentials: Credentials| async move {
            gateway.sign_in_account(&credentials).await
        })
    }

    /// Ends the session; on success every cached query is dropped
    pub fn sign_out_account(&self) -> Mutation<(), ()> {
        gateway_mutation(self, MutationKind::SignOutAccount, |gateway, ()| async move {
            gateway.sign_out_account().await
        })
    }

    pub fn create_post(&self) -> Mutation<NewPost, Post> {
        gateway_mutation(self, MutationKind::CreatePost, |gateway, post: NewPost| async move {
            gateway.create_post(&post).await
        })
    }

    pub fn like_post(&self) -> Mutation<LikePost, Post> {
        gateway_mutation(self, MutationKind::LikePost, |gateway, like: LikePost| async move {
            gateway.like_post(&like.post_id, &like.likes).await
        })
        .with_affected_id(|post| Some(post.id.clone()))
    }

    pub fn save_post(&self) -> Mutation<SavePost, SaveRecord> {
        gateway_mutation(self, MutationKind::SavePost, |gateway, save: SavePost| async move {
            gateway.save_post(&save.post_id, &save.user_id).await
        })
    }

    /// Input is the id of the save record to delete
    pub fn delete_saved_post(&self) -> Mutation<String, ()> {
        gateway_mutation(self, MutationKind::DeleteSavedPost, |gateway, record_id: String| async move {
            gateway.delete_saved_post(&record_id).await
        })
    }

    pub fn update_post(&self) -> Mutation<UpdatePost, Post> {
        gateway_mutation(self, MutationKind::UpdatePost, |gateway, post: UpdatePost| async move {
            gateway.update_post(&post).await
        })
        .with_affected_id(|post| Some(post.id.clone()))
    }

    pub fn delete_post(&self) -> Mutation<DeletePost, ()> {
        gateway_mutation(self, MutationKind::DeletePost, |gateway, post: DeletePost| async move {
            gateway.delete_post(&post.post_id, &post.image_id).await
        })
    }

    pub fn update_user(&self) -> Mutation<UpdateUser, User> {
        gateway_mutation(self, MutationKind::UpdateUser, |gateway, user: UpdateUser| async move {
            gateway.update_user(&user).await
        })
        .with_affected_id(|user| Some(user.id.clone()))
    }

    // -------------------------------------------------------------------------
    // Auth
    // -------------------------------------------------------------------------

    /// Signed-in user, read through the cache
    ///
    /// Returns `Ok(None)` when there is no session or the account has no
    /// profile document. Other gateway errors are returned as is.
    pub async fn check_auth_user(&self) -> Result<Option<User>, QueryError> {
        let state = self.current_user().fetch().await;
        if let Some(user) = state.data {
            return Ok(Some(user));
        }

        match state.error {
            Some(error)
                if matches!(
                    error.gateway(),
                    Some(AppError::Unauthorized | AppError::NotFound)
                ) =>
            {
                tracing::debug!(%error, "No authenticated user");
                Ok(None)
            }
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppConfig, BackendConfig, CacheConfig, CollectionsConfig, FeedConfig, HttpConfig,
        LoggingConfig,
    };
    use crate::gateway::MockGateway;
    use crate::query::{CacheEvent, QueryFilter};

    fn test_config() -> AppConfig {
        AppConfig {
            backend: BackendConfig {
                endpoint: "http://localhost:8080/v1".to_string(),
                project_id: "snapgram".to_string(),
                api_key: None,
                database_id: "db".to_string(),
                storage_id: "media".to_string(),
                collections: CollectionsConfig {
                    users: "users".to_string(),
                    posts: "posts".to_string(),
                    saves: "saves".to_string(),
                },
            },
            cache: CacheConfig::default(),
            feed: FeedConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            creator: "u1".to_string(),
            caption: format!("caption {id}"),
            location: None,
            tags: vec![],
            image_id: None,
            image_url: None,
            likes: vec![],
            saves: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    fn state_with(gateway: MockGateway) -> AppState {
        AppState::with_gateway(test_config(), Arc::new(gateway))
    }

    #[tokio::test]
    async fn post_by_id_without_id_never_calls_gateway() {
        let mut gateway = MockGateway::new();
        gateway.expect_get_post_by_id().times(0);
        let state = state_with(gateway);

        let observer = state.post_by_id(None);
        let result = observer.fetch().await;

        assert!(result.data.is_none());
        assert!(!observer.is_enabled().await);
    }

    #[tokio::test]
    async fn blank_search_is_disabled() {
        let mut gateway = MockGateway::new();
        gateway.expect_search_posts().times(0);
        let state = state_with(gateway);

        let observer = state.search_posts("   ");
        observer.fetch().await;

        assert!(!observer.is_enabled().await);
    }

    #[tokio::test]
    async fn like_post_failure_invalidates_nothing() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_like_post()
            .times(1)
            .returning(|_, _| Err(AppError::Unauthorized));
        let state = state_with(gateway);
        let mut events = state.query_client.subscribe();

        let result = state
            .like_post()
            .mutate(LikePost {
                post_id: "p1".to_string(),
                likes: vec!["u1".to_string()],
            })
            .await;

        assert!(result.unwrap_err().is_unauthorized());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn like_post_invalidates_the_liked_post() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_like_post()
            .times(1)
            .returning(|post_id, likes| {
                let mut liked = post(post_id);
                liked.likes = likes.to_vec();
                Ok(liked)
            });
        let state = state_with(gateway);
        let mut events = state.query_client.subscribe();

        state
            .like_post()
            .mutate(LikePost {
                post_id: "p1".to_string(),
                likes: vec!["u1".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::Invalidated(QueryFilter::prefix(
                QueryKey::new(QueryTag::GetPostById).with("p1")
            ))
        );
    }

    #[tokio::test]
    async fn check_auth_user_maps_unauthorized_to_none() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_get_current_user()
            .times(1)
            .returning(|| Err(AppError::Unauthorized));
        let state = state_with(gateway);

        assert_eq!(state.check_auth_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn check_auth_user_surfaces_backend_errors() {
        let mut gateway = MockGateway::new();
        gateway.expect_get_current_user().times(1).returning(|| {
            Err(AppError::Backend {
                status: 503,
                message: "unavailable".to_string(),
            })
        });
        let state = state_with(gateway);

        assert!(state.check_auth_user().await.is_err());
    }
}
