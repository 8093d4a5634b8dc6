//! Query keys and filters
//!
//! A cached read is addressed by an ordered tuple: a stable tag naming the
//! operation, then zero or more parameters. Filters select keys by prefix.

use std::fmt;

/// Stable operation tag, the first element of every query key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTag {
    GetCurrentUser,
    GetUsers,
    GetUserById,
    GetUserPosts,
    GetRecentPosts,
    GetPosts,
    GetInfinitePosts,
    GetPostById,
    SearchPosts,
}

impl QueryTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetCurrentUser => "getCurrentUser",
            Self::GetUsers => "getUsers",
            Self::GetUserById => "getUserById",
            Self::GetUserPosts => "getUserPosts",
            Self::GetRecentPosts => "getRecentPosts",
            Self::GetPosts => "getPosts",
            Self::GetInfinitePosts => "getInfinitePosts",
            Self::GetPostById => "getPostById",
            Self::SearchPosts => "searchPosts",
        }
    }
}

impl fmt::Display for QueryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key tuple identifying one cached read result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    tag: QueryTag,
    params: Vec<String>,
}

impl QueryKey {
    pub fn new(tag: QueryTag) -> Self {
        Self {
            tag,
            params: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn with(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn tag(&self) -> QueryTag {
        self.tag
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.tag)?;
        for param in &self.params {
            write!(f, ", {param:?}")?;
        }
        f.write_str("]")
    }
}

impl From<QueryTag> for QueryKey {
    fn from(tag: QueryTag) -> Self {
        Self::new(tag)
    }
}

/// Selects cached entries by key prefix
///
/// `[getPostById]` matches every post-by-id entry; `[getPostById, "p1"]`
/// matches only the entry for `p1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    prefix: QueryKey,
}

impl QueryFilter {
    pub fn prefix(prefix: impl Into<QueryKey>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.prefix
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        self.prefix.tag == key.tag && key.params.starts_with(&self.prefix.params)
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prefix.fmt(f)
    }
}

impl From<QueryKey> for QueryFilter {
    fn from(key: QueryKey) -> Self {
        Self::prefix(key)
    }
}

impl From<QueryTag> for QueryFilter {
    fn from(tag: QueryTag) -> Self {
        Self::prefix(tag)
    }
}
