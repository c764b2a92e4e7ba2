//! Per-request proxy logic.
//!
//! # Responsibilities
//! - GET/HEAD: answer from the cache, or fetch, store and answer
//! - Every other method: forward to the backend without touching the cache
//! - Count hits, misses and errors
//!
//! # Design Decisions
//! - No state is kept between requests
//! - The cacheable path buffers the whole backend body; pass-through streams
//! - HEAD misses fetch with GET so the body can be cached, then drop it
//! - A synthetic backend response is forwarded but never stored
//! - Two concurrent misses on one key both fetch; the last store wins

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{Fetcher, ProxyRequest, ProxyResponse};
use crate::cache::entry::is_storable_status;
use crate::cache::{Cache, CacheEntry, CacheKey, Ttl};
use crate::http::headers::{
    format_go_duration, format_latency, strip_hop_by_hop, via_value, HIT, MISS, X_CACHE,
    X_CACHE_LATENCY, X_CACHE_TTL,
};
use crate::http::request::{request_host, request_id};
use crate::observability::CacheMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Hit,
    Miss,
    Pass,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
            Outcome::Pass => "pass",
        }
    }
}

/// Request dispatcher shared by all connections.
pub struct Dispatcher {
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<dyn CacheMetrics>,
    ignore_host: bool,
}

impl Dispatcher {
    pub fn new(
        cache: Arc<dyn Cache>,
        fetcher: Arc<dyn Fetcher>,
        metrics: Arc<dyn CacheMetrics>,
        ignore_host: bool,
    ) -> Self {
        Self {
            cache,
            fetcher,
            metrics,
            ignore_host,
        }
    }

    /// Answer one client request.
    pub async fn dispatch(&self, request: axum::http::Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let (parts, body) = request.into_parts();

        let host = request_host(&parts).unwrap_or_default();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();

        let (response, outcome) = if method == Method::GET || method == Method::HEAD {
            self.cacheable(&parts, host, started).await
        } else {
            (self.pass_through(&parts, body, host).await, Outcome::Pass)
        };

        tracing::info!(
            request_id = %request_id(&parts),
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            cache = outcome.as_str(),
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Request"
        );
        response
    }

    async fn cacheable(
        &self,
        parts: &Parts,
        host: String,
        started: Instant,
    ) -> (Response<Body>, Outcome) {
        let key = CacheKey::derive(&host, parts.uri.path(), self.ignore_host);
        let head_only = parts.method == Method::HEAD;

        if let Some(entry) = self.cache.get(&key) {
            self.metrics.increment_hit();
            let mut response = entry.to_response(head_only);
            mark(response.headers_mut(), HIT, started);
            return (response, Outcome::Hit);
        }
        self.metrics.increment_miss();

        // GET upstream even for HEAD so the body can be stored.
        let request = ProxyRequest {
            method: Method::GET,
            host,
            path_and_query: path_and_query(parts),
            headers: forwarded_headers(&parts.headers),
            body: Bytes::new(),
        };
        let (upstream, ok) = self.fetcher.fetch(request).await;
        if !ok {
            self.metrics.increment_error();
        }

        let ProxyResponse {
            status,
            mut headers,
            body,
        } = upstream;
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %request_id(parts), error = %e, "Failed to read backend body");
                self.metrics.increment_error();
                let mut response =
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read backend response")
                        .into_response();
                mark(response.headers_mut(), MISS, started);
                return (response, Outcome::Miss);
            }
        };

        strip_hop_by_hop(&mut headers);
        headers.append(header::VIA, via_value());
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        let ttl = if ok && is_storable_status(status) {
            self.store(key, CacheEntry::new(status, headers.clone(), body.clone()))
        } else {
            None
        };

        let mut response = Response::new(if head_only {
            Body::empty()
        } else {
            Body::from(body)
        });
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        if let Some(ttl) = ttl {
            if let Ok(value) = HeaderValue::from_str(&format_go_duration(ttl)) {
                response.headers_mut().insert(X_CACHE_TTL, value);
            }
        }
        mark(response.headers_mut(), MISS, started);
        (response, Outcome::Miss)
    }

    /// Store `entry` under its header-derived lifetime. Returns the finite
    /// lifetime chosen, if any.
    fn store(&self, key: CacheKey, entry: CacheEntry) -> Option<Duration> {
        match Ttl::from_headers(entry.headers()) {
            Ttl::DoNotCache => None,
            Ttl::Explicit(ttl) => {
                self.cache.set_with_ttl(key, entry, ttl);
                Some(ttl)
            }
            Ttl::Default => {
                self.cache.set(key, entry);
                self.cache.default_ttl()
            }
        }
    }

    async fn pass_through(&self, parts: &Parts, body: Body, host: String) -> Response<Body> {
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %request_id(parts), error = %e, "Failed to read request body");
                return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
            }
        };

        let request = ProxyRequest {
            method: parts.method.clone(),
            host,
            path_and_query: path_and_query(parts),
            headers: forwarded_headers(&parts.headers),
            body,
        };
        let (upstream, ok) = self.fetcher.fetch(request).await;
        if !ok {
            self.metrics.increment_error();
        }

        let ProxyResponse {
            status,
            mut headers,
            body,
        } = upstream;
        strip_hop_by_hop(&mut headers);
        headers.append(header::VIA, via_value());

        let mut response = Response::new(if parts.method == Method::HEAD {
            Body::empty()
        } else {
            body
        });
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn path_and_query(parts: &Parts) -> String {
    parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .filter(|pq| pq.starts_with('/'))
        .unwrap_or_else(|| "/".to_string())
}

/// Client headers minus hop-by-hop ones and those the backend client sets
/// itself.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers
}

fn mark(headers: &mut HeaderMap, outcome: &'static str, started: Instant) {
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
    if let Ok(value) = HeaderValue::from_str(&format_latency(started.elapsed())) {
        headers.insert(X_CACHE_LATENCY, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::X_BACKEND_NAME;
    use crate::cache::{CacheStore, StoreConfig};
    use crate::observability::ProxyMetrics;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Recorded upstream call.
    #[derive(Debug, Clone)]
    struct Seen {
        method: Method,
        host: String,
        path_and_query: String,
        headers: HeaderMap,
        body: Bytes,
    }

    /// Origin answering every request with the same response.
    struct StubOrigin {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
        ok: bool,
        broken_body: bool,
        seen: Mutex<Vec<Seen>>,
    }

    impl StubOrigin {
        fn new(headers: Vec<(&'static str, &'static str)>, body: &'static str) -> Self {
            Self {
                status: StatusCode::OK,
                headers,
                body,
                ok: true,
                broken_body: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Fetcher for StubOrigin {
        async fn fetch(&self, request: ProxyRequest) -> (ProxyResponse, bool) {
            self.seen.lock().push(Seen {
                method: request.method,
                host: request.host,
                path_and_query: request.path_and_query,
                headers: request.headers,
                body: request.body,
            });
            if !self.ok {
                return (ProxyResponse::synthetic(), false);
            }
            let mut headers = HeaderMap::new();
            for (name, value) in &self.headers {
                headers.append(*name, HeaderValue::from_static(*value));
            }
            let body = if self.broken_body {
                Body::from_stream(futures_util::stream::iter(vec![
                    Ok(Bytes::from_static(b"partial")),
                    Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                ]))
            } else {
                Body::from(self.body)
            };
            (
                ProxyResponse {
                    status: self.status,
                    headers,
                    body,
                },
                true,
            )
        }
    }

    struct Harness {
        origin: Arc<StubOrigin>,
        store: Arc<CacheStore>,
        metrics: Arc<ProxyMetrics>,
        dispatcher: Dispatcher,
    }

    fn harness(origin: StubOrigin, ignore_host: bool) -> Harness {
        let origin = Arc::new(origin);
        let store = Arc::new(
            CacheStore::new(StoreConfig {
                max_objects: 100,
                max_cost: 1_000_000,
                default_ttl: Some(Duration::from_secs(300)),
            })
            .unwrap(),
        );
        let metrics = Arc::new(ProxyMetrics::new());
        let dispatcher = Dispatcher::new(store.clone(), origin.clone(), metrics.clone(), ignore_host);
        Harness {
            origin,
            store,
            metrics,
            dispatcher,
        }
    }

    fn request(method: Method, host: &str, uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_of(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let h = harness(StubOrigin::new(vec![("cache-control", "max-age=3600")], "hello"), false);

        let first = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[X_CACHE], "miss");
        assert_eq!(first.headers()[X_CACHE_TTL], "1h0m0s");
        assert!(first.headers().contains_key(X_CACHE_LATENCY));
        assert_eq!(body_of(first).await, "hello");

        let second = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(second.headers()[X_CACHE], "hit");
        assert!(!second.headers().contains_key(X_CACHE_TTL));
        assert_eq!(second.headers()[header::VIA], via_value());
        assert_eq!(body_of(second).await, "hello");

        assert_eq!(h.origin.calls(), 1);
        let snapshot = h.metrics.snapshot();
        assert_eq!((snapshot.hits, snapshot.misses, snapshot.errors), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_query_string_forwarded_but_not_keyed() {
        let h = harness(StubOrigin::new(vec![], "v"), false);
        h.dispatcher.dispatch(request(Method::GET, "a.test", "/x?v=1")).await;
        let second = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x?v=2")).await;

        assert_eq!(second.headers()[X_CACHE], "hit");
        assert_eq!(h.origin.seen.lock()[0].path_and_query, "/x?v=1");
    }

    #[tokio::test]
    async fn test_no_store_is_fetched_every_time() {
        let h = harness(StubOrigin::new(vec![("cache-control", "no-store")], "fresh"), false);
        for _ in 0..2 {
            let response = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
            assert_eq!(response.headers()[X_CACHE], "miss");
            assert!(!response.headers().contains_key(X_CACHE_TTL));
        }
        assert_eq!(h.origin.calls(), 2);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_default_ttl_reported() {
        let h = harness(StubOrigin::new(vec![], "plain"), false);
        let response = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(response.headers()[X_CACHE_TTL], "5m0s");
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_host_isolation() {
        let h = harness(StubOrigin::new(vec![], "p"), false);
        h.dispatcher.dispatch(request(Method::GET, "a.test", "/p")).await;
        let other = h.dispatcher.dispatch(request(Method::GET, "b.test", "/p")).await;
        assert_eq!(other.headers()[X_CACHE], "miss");
        assert_eq!(h.origin.calls(), 2);

        let h = harness(StubOrigin::new(vec![], "p"), true);
        h.dispatcher.dispatch(request(Method::GET, "a.test", "/p")).await;
        let other = h.dispatcher.dispatch(request(Method::GET, "b.test", "/p")).await;
        assert_eq!(other.headers()[X_CACHE], "hit");
        assert_eq!(h.origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_head_miss_fetches_get_and_drops_body() {
        let h = harness(StubOrigin::new(vec![("cache-control", "max-age=60")], "hello"), false);

        let head = h.dispatcher.dispatch(request(Method::HEAD, "a.test", "/h")).await;
        assert_eq!(head.headers()[X_CACHE], "miss");
        assert_eq!(head.headers()[header::CONTENT_LENGTH], "5");
        assert!(body_of(head).await.is_empty());
        assert_eq!(h.origin.seen.lock()[0].method, Method::GET);

        // The GET-fetched body was cached for later GETs.
        let get = h.dispatcher.dispatch(request(Method::GET, "a.test", "/h")).await;
        assert_eq!(get.headers()[X_CACHE], "hit");
        assert_eq!(body_of(get).await, "hello");

        let head = h.dispatcher.dispatch(request(Method::HEAD, "a.test", "/h")).await;
        assert_eq!(head.headers()[X_CACHE], "hit");
        assert!(body_of(head).await.is_empty());
        assert_eq!(h.origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_forwarded_not_cached() {
        let mut origin = StubOrigin::new(vec![], "");
        origin.ok = false;
        let h = harness(origin, false);

        for _ in 0..2 {
            let response = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(response.headers()[X_BACKEND_NAME], "synthetic");
            assert_eq!(response.headers()[X_CACHE], "miss");
            assert!(!response.headers().contains_key(X_CACHE_TTL));
        }
        assert!(h.store.is_empty());
        assert_eq!(h.origin.calls(), 2);
        assert_eq!(h.metrics.snapshot().errors, 2);
    }

    #[tokio::test]
    async fn test_body_read_failure_returns_500() {
        let mut origin = StubOrigin::new(vec![("cache-control", "max-age=60")], "");
        origin.broken_body = true;
        let h = harness(origin, false);

        let response = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[X_CACHE], "miss");
        assert!(h.store.is_empty());
        assert_eq!(h.metrics.snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_unstorable_status_not_cached() {
        let mut origin = StubOrigin::new(vec![("cache-control", "max-age=60")], "later");
        origin.status = StatusCode::SERVICE_UNAVAILABLE;
        let h = harness(origin, false);

        let response = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_cached_status_is_replayed() {
        let mut origin = StubOrigin::new(vec![("cache-control", "max-age=60")], "gone");
        origin.status = StatusCode::NOT_FOUND;
        let h = harness(origin, false);

        h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        let hit = h.dispatcher.dispatch(request(Method::GET, "a.test", "/x")).await;
        assert_eq!(hit.headers()[X_CACHE], "hit");
        assert_eq!(hit.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hop_by_hop_stripped_both_ways() {
        let h = harness(
            StubOrigin::new(
                vec![
                    ("cache-control", "max-age=60"),
                    ("keep-alive", "timeout=5"),
                    ("transfer-encoding", "chunked"),
                    ("x-origin", "1"),
                ],
                "body",
            ),
            false,
        );
        let mut req = request(Method::GET, "a.test", "/x");
        req.headers_mut().insert("connection", HeaderValue::from_static("keep-alive"));
        req.headers_mut().insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        req.headers_mut().insert("accept", HeaderValue::from_static("text/plain"));

        let response = h.dispatcher.dispatch(req).await;
        assert!(!response.headers().contains_key("keep-alive"));
        assert!(!response.headers().contains_key("transfer-encoding"));
        assert_eq!(response.headers()["x-origin"], "1");

        let seen = h.origin.seen.lock()[0].clone();
        assert_eq!(seen.host, "a.test");
        assert!(!seen.headers.contains_key("connection"));
        assert!(!seen.headers.contains_key("proxy-authorization"));
        assert!(!seen.headers.contains_key("host"));
        assert_eq!(seen.headers["accept"], "text/plain");
    }

    #[tokio::test]
    async fn test_post_passes_through() {
        let h = harness(StubOrigin::new(vec![("cache-control", "max-age=60")], "created"), false);

        for _ in 0..2 {
            let req = axum::http::Request::builder()
                .method(Method::POST)
                .uri("/submit?x=1")
                .header("host", "a.test")
                .header("content-length", "4")
                .body(Body::from("data"))
                .unwrap();
            let response = h.dispatcher.dispatch(req).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key(X_CACHE));
            assert!(!response.headers().contains_key(X_CACHE_TTL));
            assert_eq!(body_of(response).await, "created");
        }

        assert_eq!(h.origin.calls(), 2);
        assert!(h.store.is_empty());
        let seen = h.origin.seen.lock()[0].clone();
        assert_eq!(seen.method, Method::POST);
        assert_eq!(seen.path_and_query, "/submit?x=1");
        assert_eq!(seen.body, "data");
        assert!(!seen.headers.contains_key("content-length"));
        let snapshot = h.metrics.snapshot();
        assert_eq!((snapshot.hits, snapshot.misses), (0, 0));
    }
}
