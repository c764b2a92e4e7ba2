//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the client sent none
//! - Resolve the host a request addresses
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The client's Host is forwarded as-is; it is never replaced by the
//!   backend address

use axum::http::request::Parts;
use axum::http::{header, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request ID of `parts`, or `"-"`.
pub fn request_id(parts: &Parts) -> &str {
    parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Host the client addressed: the URI authority when the request line is
/// absolute, otherwise the Host header. Port is kept when present.
pub fn request_host(parts: &Parts) -> Option<String> {
    if let Some(authority) = parts.uri.authority() {
        return Some(authority.as_str().to_string());
    }
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
