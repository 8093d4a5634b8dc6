//! Remote data gateway
//!
//! Every read and write against the hosted backend goes through the
//! `Gateway` trait. The cache layer treats it as a black box: calls either
//! resolve with plain records or fail with an `AppError`. Timeouts and any
//! retry policy live behind this boundary.
//!
//! - `rest`: implementation over the backend's REST API

mod rest;

pub use rest::RestGateway;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Credentials, DocumentList, NewPost, NewUser, Post, SaveRecord, Session, UpdatePost,
    UpdateUser, User,
};

/// Backend operations used by the application
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    // Accounts and sessions
    async fn create_user_account(&self, user: &NewUser) -> Result<User>;
    async fn sign_in_account(&self, credentials: &Credentials) -> Result<Session>;
    async fn sign_out_account(&self) -> Result<()>;

    // Post writes
    async fn create_post(&self, post: &NewPost) -> Result<Post>;
    async fn update_post(&self, post: &UpdatePost) -> Result<Post>;
    async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<()>;

    // Post reads
    async fn get_recent_posts(&self) -> Result<Vec<Post>>;
    /// Page of posts after `cursor`; the first page has no cursor
    async fn get_infinite_posts(&self, cursor: Option<String>) -> Result<DocumentList<Post>>;
    async fn get_post_by_id(&self, post_id: &str) -> Result<Post>;
    async fn get_user_posts(&self, user_id: &str) -> Result<Vec<Post>>;
    async fn search_posts(&self, term: &str) -> Result<Vec<Post>>;

    // Likes and saves
    /// Replace the post's like list
    async fn like_post(&self, post_id: &str, likes: &[String]) -> Result<Post>;
    async fn save_post(&self, post_id: &str, user_id: &str) -> Result<SaveRecord>;
    async fn delete_saved_post(&self, save_record_id: &str) -> Result<()>;

    // Users
    /// Profile of the signed-in account
    async fn get_current_user(&self) -> Result<User>;
    async fn get_user_by_id(&self, user_id: &str) -> Result<User>;
    async fn get_users(&self, limit: Option<u32>) -> Result<Vec<User>>;
    async fn update_user(&self, user: &UpdateUser) -> Result<User>;
}
