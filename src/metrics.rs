//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Query Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_query_cache_hits_total", "Total number of fresh query cache hits"),
        &["query"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_query_cache_misses_total", "Total number of query cache misses or stale reads"),
        &["query"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGauge = IntGauge::new(
        "snapgram_query_cache_size",
        "Current number of cached query results"
    ).expect("metric can be created");
    pub static ref QUERY_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_query_fetches_total", "Total number of query fetches sent to the gateway"),
        &["query", "outcome"]
    ).expect("metric can be created");
    pub static ref QUERY_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "snapgram_query_fetch_duration_seconds",
            "Query fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["query"]
    ).expect("metric can be created");
    pub static ref DEDUPLICATED_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_query_deduplicated_fetches_total", "Reads that joined an in-flight fetch"),
        &["query"]
    ).expect("metric can be created");
    pub static ref INVALIDATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_query_invalidations_total", "Total number of invalidation filters applied"),
        &["query"]
    ).expect("metric can be created");

    // Mutation Metrics
    pub static ref MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_mutations_total", "Total number of mutations"),
        &["mutation", "outcome"]
    ).expect("metric can be created");

    // Gateway Metrics
    pub static ref GATEWAY_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_gateway_requests_total", "Total number of backend requests"),
        &["method", "status"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(QUERY_FETCHES_TOTAL.clone()))
        .expect("QUERY_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(QUERY_FETCH_DURATION_SECONDS.clone()))
        .expect("QUERY_FETCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(DEDUPLICATED_FETCHES_TOTAL.clone()))
        .expect("DEDUPLICATED_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(INVALIDATIONS_TOTAL.clone()))
        .expect("INVALIDATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MUTATIONS_TOTAL.clone()))
        .expect("MUTATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GATEWAY_REQUESTS_TOTAL.clone()))
        .expect("GATEWAY_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Render all registered metrics in Prometheus text format
pub fn gather() -> Result<String, crate::error::AppError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::error::AppError::Internal(e.into()))?;
    String::from_utf8(buffer).map_err(|e| crate::error::AppError::Internal(e.into()))
}
