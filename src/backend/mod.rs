//! Backend (origin) access subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher builds ProxyRequest (method, host, path+query, headers, body)
//!     → routing::BackendRouter picks a client by Host header
//!     → client.rs connects to its fixed target (scheme, host, port)
//!       while presenting the original Host header
//!     → ProxyResponse + ok flag (ok = false: synthetic 500 fallback)
//! ```
//!
//! # Design Decisions
//! - Connection failures never escape as errors; the caller always gets a
//!   well-formed response to forward
//! - One attempt per request, no retries
//! - Connections are pooled per client

pub mod client;
pub mod target;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;

pub use client::BackendClient;
pub use target::{BackendTarget, TargetError};

/// Outgoing request to a backend.
///
/// Owned by a single dispatch; never shared once sent.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    /// Host as the client addressed it, port included if one was sent.
    pub host: String,
    /// Path and query, always starting with `/`.
    pub path_and_query: String,
    /// End-to-end request headers, `Host` excluded.
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response returned by a backend, or synthesized in its place.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Header marking a response produced locally instead of by a backend.
pub const X_BACKEND_NAME: &str = "x-backend-name";

const SYNTHETIC_BODY: &str = "<html><body><h1>Backend unavailable</h1>\
<p>The proxy could not reach the backend for this request.</p></body></html>";

impl ProxyResponse {
    /// Fallback answered to the client when the backend is unreachable.
    pub fn synthetic() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(X_BACKEND_NAME, HeaderValue::from_static("synthetic"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(SYNTHETIC_BODY.len()));
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers,
            body: Body::from(SYNTHETIC_BODY),
        }
    }
}

/// Anything that can answer a [`ProxyRequest`].
///
/// A single [`BackendClient`] and the host-aware router are interchangeable
/// from the dispatcher's point of view.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a response. The flag is `false` when the backend could not be
    /// reached and the response is a local fallback.
    async fn fetch(&self, request: ProxyRequest) -> (ProxyResponse, bool);
}
