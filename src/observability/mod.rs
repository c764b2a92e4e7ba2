//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, text or JSON)
//!     → metrics.rs (hit / miss / error counters)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape on its own port)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through logs and back to the client
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, CacheMetrics, MetricsSnapshot, ProxyMetrics};
