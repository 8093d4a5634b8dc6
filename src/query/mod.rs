//! Cache synchronization layer
//!
//! Wraps every gateway read in a keyed, deduplicated, cached query and every
//! gateway write in a mutation that invalidates the affected keys once the
//! write has succeeded.
//!
//! - `key`: query keys and prefix filters
//! - `client`: the cache store, in-flight deduplication, invalidation
//! - `observer`: per-consumer query state, enable gating, mounting
//! - `infinite`: cursor pagination
//! - `mutation`: writes and their state
//! - `invalidation`: mutation kind -> post-commit policy

mod client;
mod infinite;
mod invalidation;
mod key;
mod mutation;
mod observer;

pub use client::{CacheEvent, QueryClient, QueryClientOptions};
pub use infinite::{InfiniteData, InfiniteQueryObserver, PageFetcher, next_page_param};
pub use invalidation::{MutationKind, PostCommit};
pub use key::{QueryFilter, QueryKey, QueryTag};
pub use mutation::{Mutation, MutationFn, MutationState, MutationStatus};
pub use observer::{
    Fetcher, MountHandle, QueryObserver, QueryOptions, QueryState, QueryStatus,
};
