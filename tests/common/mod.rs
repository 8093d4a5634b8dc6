//! Common test utilities
//!
//! `FakeGateway` keeps users and posts in memory, counts calls per
//! operation, and can be told to fail or slow down specific operations.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use snapgram::error::{AppError, Result};
use snapgram::gateway::Gateway;
use snapgram::models::{
    Credentials, DocumentList, NewPost, NewUser, Post, SaveRecord, Session, UpdatePost,
    UpdateUser, User,
};
use snapgram::{AppState, config};

/// Create test configuration
pub fn test_config() -> config::AppConfig {
    config::AppConfig {
        backend: config::BackendConfig {
            endpoint: "http://127.0.0.1:9/v1".to_string(),
            project_id: "test-project".to_string(),
            api_key: None,
            database_id: "test-db".to_string(),
            storage_id: "test-media".to_string(),
            collections: config::CollectionsConfig {
                users: "users".to_string(),
                posts: "posts".to_string(),
                saves: "saves".to_string(),
            },
        },
        cache: config::CacheConfig::default(),
        feed: config::FeedConfig {
            recent_limit: 20,
            page_size: 3,
        },
        http: config::HttpConfig::default(),
        logging: config::LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Application state over a fake gateway
pub fn test_state(gateway: Arc<FakeGateway>) -> AppState {
    AppState::with_gateway(test_config(), gateway)
}

pub fn post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        creator: "u1".to_string(),
        caption: format!("caption {id}"),
        location: None,
        tags: vec![],
        image_id: Some(format!("img-{id}")),
        image_url: None,
        likes: vec![],
        saves: vec![],
        created_at: None,
        updated_at: None,
    }
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        account_id: format!("acct-{id}"),
        email: format!("{id}@example.com"),
        name: format!("User {id}"),
        username: Some(id.to_string()),
        bio: None,
        image_id: None,
        image_url: None,
        liked: vec![],
        saves: vec![],
    }
}

/// In-memory gateway
#[derive(Default)]
pub struct FakeGateway {
    /// Newest first
    posts: Mutex<Vec<Post>>,
    users: Mutex<Vec<User>>,
    current_user: Mutex<Option<String>>,
    page_size: usize,
    calls: Mutex<HashMap<&'static str, usize>>,
    cursors: Mutex<Vec<Option<String>>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
    next_id: Mutex<usize>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            page_size: 3,
            ..Default::default()
        }
    }

    pub fn with_posts(self, ids: &[&str]) -> Self {
        *self.posts.lock().unwrap() = ids.iter().map(|id| post(id)).collect();
        self
    }

    pub fn with_users(self, ids: &[&str]) -> Self {
        *self.users.lock().unwrap() = ids.iter().map(|id| user(id)).collect();
        self
    }

    pub fn signed_in_as(self, user_id: &str) -> Self {
        *self.current_user.lock().unwrap() = Some(user_id.to_string());
        self
    }

    /// Number of calls made to `operation`
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Cursors passed to `get_infinite_posts`, in call order
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }

    /// Make every later call to `operation` fail with a backend error
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Slow every call down
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(operation) {
            return Err(AppError::Backend {
                status: 500,
                message: format!("{operation} failed"),
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}")
    }

    fn find_post(&self, post_id: &str) -> Result<Post> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn create_user_account(&self, new_user: &NewUser) -> Result<User> {
        self.enter("create_user_account").await?;
        let mut created = user(&self.next_id("u"));
        created.name = new_user.name.clone();
        created.email = new_user.email.clone();
        created.username = Some(new_user.username.clone());
        self.users.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn sign_in_account(&self, credentials: &Credentials) -> Result<Session> {
        self.enter("sign_in_account").await?;
        let found = self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.email == credentials.email)
            .cloned()
            .ok_or(AppError::Unauthorized)?;
        *self.current_user.lock().unwrap() = Some(found.id.clone());
        Ok(Session {
            id: self.next_id("session"),
            user_id: found.account_id,
            secret: "secret".to_string(),
            expire: None,
        })
    }

    async fn sign_out_account(&self) -> Result<()> {
        self.enter("sign_out_account").await?;
        *self.current_user.lock().unwrap() = None;
        Ok(())
    }

    async fn create_post(&self, new_post: &NewPost) -> Result<Post> {
        self.enter("create_post").await?;
        let mut created = post(&self.next_id("p"));
        created.creator = new_post.creator.clone();
        created.caption = new_post.caption.clone();
        created.tags = new_post.tags.clone();
        self.posts.lock().unwrap().insert(0, created.clone());
        Ok(created)
    }

    async fn update_post(&self, update: &UpdatePost) -> Result<Post> {
        self.enter("update_post").await?;
        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .iter_mut()
            .find(|post| post.id == update.post_id)
            .ok_or(AppError::NotFound)?;
        post.caption = update.caption.clone();
        post.tags = update.tags.clone();
        Ok(post.clone())
    }

    async fn delete_post(&self, post_id: &str, _image_id: &str) -> Result<()> {
        self.enter("delete_post").await?;
        self.posts.lock().unwrap().retain(|post| post.id != post_id);
        Ok(())
    }

    async fn get_recent_posts(&self) -> Result<Vec<Post>> {
        self.enter("get_recent_posts").await?;
        Ok(self.posts.lock().unwrap().iter().take(20).cloned().collect())
    }

    async fn get_infinite_posts(&self, cursor: Option<String>) -> Result<DocumentList<Post>> {
        self.cursors.lock().unwrap().push(cursor.clone());
        self.enter("get_infinite_posts").await?;

        let posts = self.posts.lock().unwrap();
        let start = match &cursor {
            Some(cursor) => posts
                .iter()
                .position(|post| &post.id == cursor)
                .map_or(posts.len(), |index| index + 1),
            None => 0,
        };
        Ok(DocumentList::new(
            posts.iter().skip(start).take(self.page_size).cloned().collect(),
        ))
    }

    async fn get_post_by_id(&self, post_id: &str) -> Result<Post> {
        self.enter("get_post_by_id").await?;
        self.find_post(post_id)
    }

    async fn get_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        self.enter("get_user_posts").await?;
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|post| post.creator == user_id)
            .cloned()
            .collect())
    }

    async fn search_posts(&self, term: &str) -> Result<Vec<Post>> {
        self.enter("search_posts").await?;
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|post| post.caption.contains(term))
            .cloned()
            .collect())
    }

    async fn like_post(&self, post_id: &str, likes: &[String]) -> Result<Post> {
        self.enter("like_post").await?;
        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .iter_mut()
            .find(|post| post.id == post_id)
            .ok_or(AppError::NotFound)?;
        post.likes = likes.to_vec();
        Ok(post.clone())
    }

    async fn save_post(&self, post_id: &str, user_id: &str) -> Result<SaveRecord> {
        self.enter("save_post").await?;
        Ok(SaveRecord {
            id: self.next_id("s"),
            user: user_id.to_string(),
            post: post_id.to_string(),
        })
    }

    async fn delete_saved_post(&self, _save_record_id: &str) -> Result<()> {
        self.enter("delete_saved_post").await?;
        Ok(())
    }

    async fn get_current_user(&self) -> Result<User> {
        self.enter("get_current_user").await?;
        let current = self
            .current_user
            .lock()
            .unwrap()
            .clone()
            .ok_or(AppError::Unauthorized)?;
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.id == current)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<User> {
        self.enter("get_user_by_id").await?;
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn get_users(&self, limit: Option<u32>) -> Result<Vec<User>> {
        self.enter("get_users").await?;
        let users = self.users.lock().unwrap();
        let limit = limit.map_or(users.len(), |limit| limit as usize);
        Ok(users.iter().take(limit).cloned().collect())
    }

    async fn update_user(&self, update: &UpdateUser) -> Result<User> {
        self.enter("update_user").await?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|user| user.id == update.user_id)
            .ok_or(AppError::NotFound)?;
        user.name = update.name.clone();
        user.bio = update.bio.clone();
        Ok(user.clone())
    }
}

/// Wait until `condition` holds, polling briefly
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
