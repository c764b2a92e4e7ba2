//! Cached response representation.

use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use bytes::Bytes;

/// Statuses a shared cache may store without explicit freshness information.
/// Partial content (206) is excluded since ranges are never cached.
const STORABLE_STATUSES: [u16; 11] = [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// Immutable snapshot of a backend response.
///
/// Replaced wholesale on re-insertion; never updated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Accounting cost: body length in bytes.
    pub fn cost(&self) -> u64 {
        self.body.len() as u64
    }

    /// Build a client response from this entry. `head_only` drops the body
    /// but keeps the headers, including `Content-Length`.
    pub fn to_response(&self, head_only: bool) -> Response<Body> {
        let body = if head_only {
            Body::empty()
        } else {
            Body::from(self.body.clone())
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Whether a response with this status may be stored.
pub fn is_storable_status(status: StatusCode) -> bool {
    STORABLE_STATUSES.contains(&status.as_u16())
}
