//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_cache_hits_total` (counter): requests answered from the cache
//! - `proxy_cache_misses_total` (counter): cacheable requests sent upstream
//! - `proxy_errors_total` (counter): backend or body failures
//!
//! # Design Decisions
//! - Counters are atomic increments, no locks on the request path
//! - In-process totals are kept alongside the exporter for logs and tests
//! - The scrape endpoint runs on its own port

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const CACHE_HITS: &str = "proxy_cache_hits_total";
pub const CACHE_MISSES: &str = "proxy_cache_misses_total";
pub const ERRORS: &str = "proxy_errors_total";

/// Counters the dispatcher bumps as side effects.
pub trait CacheMetrics: Send + Sync {
    fn increment_hit(&self);
    fn increment_miss(&self);
    fn increment_error(&self);
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Proxy counters, shared by `Arc`.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        metrics::describe_counter!(CACHE_HITS, "Requests answered from the cache");
        metrics::describe_counter!(CACHE_MISSES, "Cacheable requests fetched from a backend");
        metrics::describe_counter!(ERRORS, "Backend connectivity and body read failures");
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for ProxyMetrics {
    fn increment_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CACHE_HITS).increment(1);
    }

    fn increment_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CACHE_MISSES).increment(1);
    }

    fn increment_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(ERRORS).increment(1);
    }
}

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}
