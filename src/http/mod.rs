//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → dispatcher.rs
//!         GET/HEAD: cache lookup → hit, or fetch → store → miss
//!         other:    fetch → stream back
//!     → headers.rs (hop-by-hop removal, Via, X-Cache diagnostics)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod headers;
pub mod request;
pub mod server;

pub use dispatcher::Dispatcher;
pub use headers::{X_CACHE, X_CACHE_LATENCY, X_CACHE_TTL};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
