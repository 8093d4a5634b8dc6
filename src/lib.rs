//! Snapgram - client-side cache synchronization for a social feed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Hooks Layer                             │
//! │  - One query / mutation constructor per UI operation        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Query Layer                             │
//! │  - Keyed cache (moka), in-flight deduplication              │
//! │  - Observers, cursor pagination                             │
//! │  - Mutations with post-commit invalidation                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway Layer                            │
//! │  - Appwrite-style REST backend (reqwest)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `hooks`: Queries and mutations used by the application
//! - `query`: Cache, observers, pagination, invalidation
//! - `gateway`: Backend access
//! - `models`: Documents and write inputs
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod config;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod metrics;
pub mod models;
pub mod query;

use std::sync::Arc;

/// Application state shared by every query and mutation
///
/// Cheap to clone; clones share the gateway and the query cache.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Backend access
    pub gateway: Arc<dyn gateway::Gateway>,

    /// Query cache
    pub query_client: query::QueryClient,
}

impl AppState {
    /// Initialize application state against the configured backend
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let gateway = gateway::RestGateway::new(&config)?;
        tracing::info!(endpoint = %config.backend.base_url(), "REST gateway initialized");

        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }

    /// Application state over any gateway
    pub fn with_gateway(config: config::AppConfig, gateway: Arc<dyn gateway::Gateway>) -> Self {
        let query_client =
            query::QueryClient::new(query::QueryClientOptions::from(&config.cache));
        tracing::debug!(
            max_entries = config.cache.max_entries,
            stale_time_secs = config.cache.stale_time_secs,
            gc_time_secs = config.cache.gc_time_secs,
            "Query cache initialized"
        );

        Self {
            config: Arc::new(config),
            gateway,
            query_client,
        }
    }
}
