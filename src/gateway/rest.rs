//! REST gateway
//!
//! Talks to an Appwrite-style backend over HTTP:
//! - `/account...` for sign-up, sessions and the signed-in account
//! - `/databases/{db}/collections/{col}/documents...` for users, posts, saves
//! - `/storage/buckets/{bucket}/files...` for images
//!
//! List calls take `queries[]` parameters, each a JSON-encoded query.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

use super::Gateway;
use crate::config::{AppConfig, BackendConfig, FeedConfig};
use crate::error::{AppError, Result};
use crate::metrics::GATEWAY_REQUESTS_TOTAL;
use crate::models::{
    Credentials, DocumentId, DocumentList, ImageUpload, NewPost, NewUser, Post, SaveRecord,
    Session, UpdatePost, UpdateUser, User,
};

// =============================================================================
// Queries
// =============================================================================

/// JSON-encoded list query builders
mod queries {
    use serde::Serialize;
    use serde_json::Value;

    #[derive(Serialize)]
    struct Query<'a> {
        method: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        attribute: Option<&'a str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        values: Vec<Value>,
    }

    fn encode(method: &str, attribute: Option<&str>, values: Vec<Value>) -> String {
        let query = Query {
            method,
            attribute,
            values,
        };
        serde_json::to_string(&query).unwrap_or_default()
    }

    pub fn order_desc(attribute: &str) -> String {
        encode("orderDesc", Some(attribute), Vec::new())
    }

    pub fn limit(limit: u32) -> String {
        encode("limit", None, vec![limit.into()])
    }

    pub fn cursor_after(document_id: &str) -> String {
        encode("cursorAfter", None, vec![document_id.into()])
    }

    pub fn search(attribute: &str, term: &str) -> String {
        encode("search", Some(attribute), vec![term.into()])
    }

    pub fn equal(attribute: &str, value: &str) -> String {
        encode("equal", Some(attribute), vec![value.into()])
    }
}

/// Error body returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Account record returned by `/account`
#[derive(Debug, Deserialize)]
struct Account {
    #[serde(rename = "$id")]
    id: String,
}

/// Uploaded file record
#[derive(Debug, Deserialize)]
struct StoredFile {
    #[serde(rename = "$id")]
    id: String,
}

// =============================================================================
// Gateway
// =============================================================================

/// Gateway over the backend's REST API
pub struct RestGateway {
    http_client: reqwest::Client,
    backend: BackendConfig,
    feed: FeedConfig,
    /// Session established by `sign_in_account`
    session: RwLock<Option<Session>>,
}

impl RestGateway {
    /// Create new REST gateway
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.http.user_agent.clone())
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            backend: config.backend.clone(),
            feed: config.feed.clone(),
            session: RwLock::new(None),
        })
    }

    /// Current session, if signed in
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Reuse a session obtained elsewhere
    pub async fn restore_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.backend.base_url(), path)
    }

    fn documents_path(&self, collection: &str) -> String {
        format!(
            "/databases/{}/collections/{}/documents",
            self.backend.database_id, collection
        )
    }

    fn files_path(&self) -> String {
        format!("/storage/buckets/{}/files", self.backend.storage_id)
    }

    /// Public preview URL for an uploaded image
    pub fn file_preview_url(&self, file_id: &str) -> String {
        format!(
            "{}/{}/preview?width=2000&height=2000&gravity=top&quality=100&project={}",
            self.url(&self.files_path()),
            file_id,
            self.backend.project_id
        )
    }

    /// Initials avatar used until a user uploads a profile image
    fn avatar_url(&self, name: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.url("/avatars/initials"))
            .map_err(|e| AppError::Config(format!("backend.endpoint is not a valid URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("project", &self.backend.project_id);
        Ok(url.to_string())
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http_client
            .request(method, self.url(path))
            .header("X-Appwrite-Project", &self.backend.project_id);

        if let Some(api_key) = &self.backend.api_key {
            builder = builder.header("X-Appwrite-Key", api_key);
        }
        if let Some(session) = self.session.read().await.as_ref() {
            builder = builder.header("X-Appwrite-Session", &session.secret);
        }

        builder
    }

    async fn execute(&self, builder: RequestBuilder, method: &'static str) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        GATEWAY_REQUESTS_TOTAL
            .with_label_values(&[method, status.as_str()])
            .inc();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|error| error.message)
            .unwrap_or(body);
        tracing::debug!(status = status.as_u16(), %message, "Backend request failed");
        Err(AppError::from_status(status.as_u16(), message))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, method: &'static str) -> Result<T> {
        let response = self.execute(builder, method).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_empty(&self, builder: RequestBuilder, method: &'static str) -> Result<()> {
        self.execute(builder, method).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Documents
    // -------------------------------------------------------------------------

    async fn list_documents<T: DeserializeOwned>(
        &self,
        collection: &str,
        queries: &[String],
    ) -> Result<DocumentList<T>> {
        let params: Vec<(&str, &str)> = queries.iter().map(|q| ("queries[]", q.as_str())).collect();
        let builder = self
            .request(Method::GET, &self.documents_path(collection))
            .await
            .query(&params);
        self.send(builder, "GET").await
    }

    async fn get_document<T: DeserializeOwned>(&self, collection: &str, document_id: &str) -> Result<T> {
        let path = format!("{}/{}", self.documents_path(collection), document_id);
        let builder = self.request(Method::GET, &path).await;
        self.send(builder, "GET").await
    }

    async fn create_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        data: serde_json::Value,
    ) -> Result<T> {
        let builder = self
            .request(Method::POST, &self.documents_path(collection))
            .await
            .json(&json!({ "documentId": DocumentId::unique(), "data": data }));
        self.send(builder, "POST").await
    }

    async fn update_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        document_id: &str,
        data: serde_json::Value,
    ) -> Result<T> {
        let path = format!("{}/{}", self.documents_path(collection), document_id);
        let builder = self
            .request(Method::PATCH, &path)
            .await
            .json(&json!({ "data": data }));
        self.send(builder, "PATCH").await
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<()> {
        let path = format!("{}/{}", self.documents_path(collection), document_id);
        let builder = self.request(Method::DELETE, &path).await;
        self.send_empty(builder, "DELETE").await
    }

    // -------------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------------

    async fn upload_file(&self, image: &ImageUpload) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)?;
        let form = reqwest::multipart::Form::new()
            .text("fileId", DocumentId::unique().0)
            .part("file", part);

        let builder = self
            .request(Method::POST, &self.files_path())
            .await
            .multipart(form);
        let file: StoredFile = self.send(builder, "POST").await?;

        tracing::debug!(file_id = %file.id, bytes = image.bytes.len(), "Uploaded image");
        Ok(file.id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let path = format!("{}/{}", self.files_path(), file_id);
        let builder = self.request(Method::DELETE, &path).await;
        self.send_empty(builder, "DELETE").await
    }

    /// Remove a file whose document write did not go through
    async fn discard_file(&self, file_id: &str) {
        if let Err(error) = self.delete_file(file_id).await {
            tracing::warn!(file_id, %error, "Failed to delete orphaned image");
        }
    }

    /// Upload a replacement image, returning its id and preview URL
    async fn replace_image(&self, new_image: Option<&ImageUpload>) -> Result<Option<(String, String)>> {
        match new_image {
            Some(image) => {
                let file_id = self.upload_file(image).await?;
                let url = self.file_preview_url(&file_id);
                Ok(Some((file_id, url)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn create_user_account(&self, user: &NewUser) -> Result<User> {
        let builder = self.request(Method::POST, "/account").await.json(&json!({
            "userId": DocumentId::unique(),
            "email": user.email,
            "password": user.password,
            "name": user.name,
        }));
        let account: Account = self.send(builder, "POST").await?;

        let profile = json!({
            "accountId": account.id,
            "name": user.name,
            "email": user.email,
            "username": user.username,
            "imageUrl": self.avatar_url(&user.name)?,
        });
        let created: User = self
            .create_document(&self.backend.collections.users, profile)
            .await?;

        tracing::info!(user_id = %created.id, "User account created");
        Ok(created)
    }

    async fn sign_in_account(&self, credentials: &Credentials) -> Result<Session> {
        let builder = self
            .request(Method::POST, "/account/sessions/email")
            .await
            .json(&json!({ "email": credentials.email, "password": credentials.password }));
        let session: Session = self.send(builder, "POST").await?;

        *self.session.write().await = Some(session.clone());
        tracing::info!(user_id = %session.user_id, "Signed in");
        Ok(session)
    }

    async fn sign_out_account(&self) -> Result<()> {
        let builder = self
            .request(Method::DELETE, "/account/sessions/current")
            .await;
        self.send_empty(builder, "DELETE").await?;

        *self.session.write().await = None;
        tracing::info!("Signed out");
        Ok(())
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let image = self.replace_image(post.image.as_ref()).await?;
        let (image_id, image_url) = image.clone().unzip();

        let data = json!({
            "creator": post.creator,
            "caption": post.caption,
            "location": post.location,
            "tags": post.tags,
            "imageId": image_id,
            "imageUrl": image_url,
        });

        match self.create_document(&self.backend.collections.posts, data).await {
            Ok(created) => Ok(created),
            Err(error) => {
                if let Some((file_id, _)) = image {
                    self.discard_file(&file_id).await;
                }
                Err(error)
            }
        }
    }

    async fn update_post(&self, post: &UpdatePost) -> Result<Post> {
        let replacement = self.replace_image(post.new_image.as_ref()).await?;
        let (image_id, image_url) = match &replacement {
            Some((file_id, url)) => (Some(file_id.clone()), Some(url.clone())),
            None => (post.image_id.clone(), post.image_url.clone()),
        };

        let data = json!({
            "caption": post.caption,
            "location": post.location,
            "tags": post.tags,
            "imageId": image_id,
            "imageUrl": image_url,
        });

        match self
            .update_document::<Post>(&self.backend.collections.posts, &post.post_id, data)
            .await
        {
            Ok(updated) => {
                if replacement.is_some() {
                    if let Some(old_image) = &post.image_id {
                        self.discard_file(old_image).await;
                    }
                }
                Ok(updated)
            }
            Err(error) => {
                if let Some((file_id, _)) = replacement {
                    self.discard_file(&file_id).await;
                }
                Err(error)
            }
        }
    }

    async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<()> {
        if post_id.is_empty() {
            return Err(AppError::Validation("post id is required".to_string()));
        }

        self.delete_document(&self.backend.collections.posts, post_id)
            .await?;
        // The post is gone at this point; a leftover file must not fail the write
        if !image_id.is_empty() {
            self.discard_file(image_id).await;
        }
        Ok(())
    }

    async fn get_recent_posts(&self) -> Result<Vec<Post>> {
        let queries = [
            queries::order_desc("$createdAt"),
            queries::limit(self.feed.recent_limit),
        ];
        let list: DocumentList<Post> = self
            .list_documents(&self.backend.collections.posts, &queries)
            .await?;
        Ok(list.documents)
    }

    async fn get_infinite_posts(&self, cursor: Option<String>) -> Result<DocumentList<Post>> {
        let mut queries = vec![
            queries::order_desc("$updatedAt"),
            queries::limit(self.feed.page_size),
        ];
        if let Some(cursor) = cursor {
            queries.push(queries::cursor_after(&cursor));
        }
        self.list_documents(&self.backend.collections.posts, &queries)
            .await
    }

    async fn get_post_by_id(&self, post_id: &str) -> Result<Post> {
        self.get_document(&self.backend.collections.posts, post_id)
            .await
    }

    async fn get_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        let queries = [
            queries::equal("creator", user_id),
            queries::order_desc("$createdAt"),
        ];
        let list: DocumentList<Post> = self
            .list_documents(&self.backend.collections.posts, &queries)
            .await?;
        Ok(list.documents)
    }

    async fn search_posts(&self, term: &str) -> Result<Vec<Post>> {
        let queries = [queries::search("caption", term)];
        let list: DocumentList<Post> = self
            .list_documents(&self.backend.collections.posts, &queries)
            .await?;
        Ok(list.documents)
    }

    async fn like_post(&self, post_id: &str, likes: &[String]) -> Result<Post> {
        self.update_document(
            &self.backend.collections.posts,
            post_id,
            json!({ "likes": likes }),
        )
        .await
    }

    async fn save_post(&self, post_id: &str, user_id: &str) -> Result<SaveRecord> {
        self.create_document(
            &self.backend.collections.saves,
            json!({ "user": user_id, "post": post_id }),
        )
        .await
    }

    async fn delete_saved_post(&self, save_record_id: &str) -> Result<()> {
        self.delete_document(&self.backend.collections.saves, save_record_id)
            .await
    }

    async fn get_current_user(&self) -> Result<User> {
        let builder = self.request(Method::GET, "/account").await;
        let account: Account = self.send(builder, "GET").await?;

        let queries = [queries::equal("accountId", &account.id)];
        let list: DocumentList<User> = self
            .list_documents(&self.backend.collections.users, &queries)
            .await?;
        list.documents.into_iter().next().ok_or(AppError::NotFound)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<User> {
        self.get_document(&self.backend.collections.users, user_id)
            .await
    }

    async fn get_users(&self, limit: Option<u32>) -> Result<Vec<User>> {
        let mut queries = vec![queries::order_desc("$createdAt")];
        if let Some(limit) = limit {
            queries.push(queries::limit(limit));
        }
        let list: DocumentList<User> = self
            .list_documents(&self.backend.collections.users, &queries)
            .await?;
        Ok(list.documents)
    }

    async fn update_user(&self, user: &UpdateUser) -> Result<User> {
        let replacement = self.replace_image(user.new_image.as_ref()).await?;
        let (image_id, image_url) = match &replacement {
            Some((file_id, url)) => (Some(file_id.clone()), Some(url.clone())),
            None => (user.image_id.clone(), user.image_url.clone()),
        };

        let data = json!({
            "name": user.name,
            "bio": user.bio,
            "imageId": image_id,
            "imageUrl": image_url,
        });

        match self
            .update_document::<User>(&self.backend.collections.users, &user.user_id, data)
            .await
        {
            Ok(updated) => {
                if replacement.is_some() {
                    if let Some(old_image) = &user.image_id {
                        self.discard_file(old_image).await;
                    }
                }
                Ok(updated)
            }
            Err(error) => {
                if let Some((file_id, _)) = replacement {
                    self.discard_file(&file_id).await;
                }
                Err(error)
            }
        }
    }
}
