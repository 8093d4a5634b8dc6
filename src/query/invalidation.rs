//! Post-commit invalidation policy
//!
//! Maps each mutation kind to what must happen to the cache once its write
//! has succeeded. Invalidation is deliberately coarse: liking a post marks
//! whole lists stale instead of patching the one post inside them.

use std::fmt;

use super::client::QueryClient;
use super::key::{QueryFilter, QueryKey, QueryTag};

/// Every write the application performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateUserAccount,
    SignInAccount,
    SignOutAccount,
    CreatePost,
    LikePost,
    SavePost,
    DeleteSavedPost,
    UpdatePost,
    DeletePost,
    UpdateUser,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateUserAccount => "create_user_account",
            Self::SignInAccount => "sign_in_account",
            Self::SignOutAccount => "sign_out_account",
            Self::CreatePost => "create_post",
            Self::LikePost => "like_post",
            Self::SavePost => "save_post",
            Self::DeleteSavedPost => "delete_saved_post",
            Self::UpdatePost => "update_post",
            Self::DeletePost => "delete_post",
            Self::UpdateUser => "update_user",
        }
    }

    /// Cache work to run after this mutation succeeds
    ///
    /// `affected_id` is the id of the document the write returned. Keys
    /// scoped to a single document are skipped when it is unknown.
    pub fn post_commit(&self, affected_id: Option<&str>) -> PostCommit {
        let by_id = |tag: QueryTag| affected_id.map(|id| QueryFilter::prefix(QueryKey::new(tag).with(id)));
        let tag = |tag: QueryTag| Some(QueryFilter::prefix(tag));

        let filters = match self {
            Self::CreateUserAccount | Self::SignInAccount => vec![],
            Self::SignOutAccount => return PostCommit::ResetCache,
            Self::CreatePost | Self::DeletePost => vec![tag(QueryTag::GetRecentPosts)],
            Self::LikePost => vec![
                by_id(QueryTag::GetPostById),
                tag(QueryTag::GetRecentPosts),
                tag(QueryTag::GetPosts),
                tag(QueryTag::GetCurrentUser),
            ],
            Self::SavePost | Self::DeleteSavedPost => vec![
                tag(QueryTag::GetRecentPosts),
                tag(QueryTag::GetPosts),
                tag(QueryTag::GetCurrentUser),
            ],
            Self::UpdatePost => vec![by_id(QueryTag::GetPostById)],
            Self::UpdateUser => vec![tag(QueryTag::GetCurrentUser), by_id(QueryTag::GetUserById)],
        };

        PostCommit::Invalidate(filters.into_iter().flatten().collect())
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful mutation does to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommit {
    /// Mark the matching entries stale
    Invalidate(Vec<QueryFilter>),
    /// Drop the whole cache; consumers start over as after a reload
    ResetCache,
}

impl PostCommit {
    /// Filters invalidated; empty for a reset
    pub fn filters(&self) -> &[QueryFilter] {
        match self {
            PostCommit::Invalidate(filters) => filters,
            PostCommit::ResetCache => &[],
        }
    }

    pub async fn apply(&self, client: &QueryClient) {
        match self {
            PostCommit::Invalidate(filters) => {
                for filter in filters {
                    client.invalidate_queries(filter.clone()).await;
                }
            }
            PostCommit::ResetCache => client.clear().await,
        }
    }
}
