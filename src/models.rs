//! Data models
//!
//! Rust structs representing the documents stored by the backend and the
//! input records passed to gateway writes. Documents carry the backend's
//! `$id`; relation fields accept either bare ids or expanded documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Document ID wrapper (ULID format, 26 characters)
///
/// Used when the client picks the id of a document or file it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Generate a new unique id
    pub fn unique() -> Self {
        Self(ulid::Ulid::new().to_string().to_ascii_lowercase())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::unique()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything addressable by a document id
///
/// Cursor pagination reads the id of the last document on a page.
pub trait Document {
    fn id(&self) -> &str;
}

// =============================================================================
// User
// =============================================================================

/// A user profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "$id")]
    pub id: String,
    /// Id of the auth account backing this profile
    #[serde(rename = "accountId", default)]
    pub account_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Storage file id of the profile image
    #[serde(rename = "imageId", default)]
    pub image_id: Option<String>,
    /// Public URL of the profile image
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    /// Ids of posts this user liked
    #[serde(default, deserialize_with = "relation_ids")]
    pub liked: Vec<String>,
    /// Ids of this user's save records
    #[serde(rename = "save", default, deserialize_with = "relation_ids")]
    pub saves: Vec<String>,
}

impl Document for User {
    fn id(&self) -> &str {
        &self.id
    }
}

// =============================================================================
// Post
// =============================================================================

/// A post document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "$id")]
    pub id: String,
    /// Author's user id
    #[serde(deserialize_with = "relation_id")]
    pub creator: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Storage file id of the attached image
    #[serde(rename = "imageId", default)]
    pub image_id: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    /// User ids that liked this post
    #[serde(default, deserialize_with = "relation_ids")]
    pub likes: Vec<String>,
    /// Save record ids pointing at this post
    #[serde(rename = "save", default, deserialize_with = "relation_ids")]
    pub saves: Vec<String>,
    #[serde(rename = "$createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "$updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

impl Document for Post {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A saved-post record linking a user to a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(deserialize_with = "relation_id")]
    pub user: String,
    #[serde(deserialize_with = "relation_id")]
    pub post: String,
}

impl Document for SaveRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

// =============================================================================
// Session
// =============================================================================

/// Authenticated session
///
/// Has no identity beyond its token; tied to exactly one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Token sent back on subsequent requests
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
}

impl Session {
    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expire.is_some_and(|expire| expire < Utc::now())
    }
}

// =============================================================================
// Lists
// =============================================================================

/// One page of documents as returned by a list call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentList<T> {
    #[serde(default)]
    pub total: u64,
    pub documents: Vec<T>,
}

impl<T> DocumentList<T> {
    pub fn new(documents: Vec<T>) -> Self {
        Self {
            total: documents.len() as u64,
            documents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl<T> Default for DocumentList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Sign-up form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Sign-in form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Image bytes to upload alongside a post or profile update
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Create-post form
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    /// Author's user id
    pub creator: String,
    pub caption: String,
    pub location: Option<String>,
    pub tags: Vec<String>,
    pub image: Option<ImageUpload>,
}

/// Edit-post form
///
/// `image_id`/`image_url` describe the current image; `new_image` replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePost {
    pub post_id: String,
    pub caption: String,
    pub location: Option<String>,
    pub tags: Vec<String>,
    pub image_id: Option<String>,
    pub image_url: Option<String>,
    pub new_image: Option<ImageUpload>,
}

/// Edit-profile form
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateUser {
    pub user_id: String,
    pub name: String,
    pub bio: Option<String>,
    pub image_id: Option<String>,
    pub image_url: Option<String>,
    pub new_image: Option<ImageUpload>,
}

/// Like-button input: the full like list after toggling
#[derive(Debug, Clone, PartialEq)]
pub struct LikePost {
    pub post_id: String,
    pub likes: Vec<String>,
}

/// Save-button input
#[derive(Debug, Clone, PartialEq)]
pub struct SavePost {
    pub post_id: String,
    pub user_id: String,
}

/// Delete-post input
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePost {
    pub post_id: String,
    /// Storage file id of the post image, removed after the document
    pub image_id: String,
}

/// Split a comma separated tag field ("rust, async ,cache") into tags
pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|tag| tag.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|tag| !tag.is_empty())
        .collect()
}

// =============================================================================
// Relation decoding
// =============================================================================

/// A relation attribute is either an id or an expanded document
#[derive(Deserialize)]
#[serde(untagged)]
enum Relation {
    Id(String),
    Expanded {
        #[serde(rename = "$id")]
        id: String,
    },
}

impl Relation {
    fn into_id(self) -> String {
        match self {
            Relation::Id(id) | Relation::Expanded { id } => id,
        }
    }
}

fn relation_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Relation::deserialize(deserializer).map(Relation::into_id)
}

fn relation_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let relations = Option::<Vec<Relation>>::deserialize(deserializer)?;
    Ok(relations
        .unwrap_or_default()
        .into_iter()
        .map(Relation::into_id)
        .collect())
}
