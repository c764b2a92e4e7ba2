//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Bind server to listener
//! - Dispatch requests to the dispatcher
//! - Stop accepting on shutdown and drain in-flight requests

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::FrontendConfig;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};

/// HTTP server for the caching proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server around `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, frontend: &FrontendConfig) -> Self {
        Self {
            router: Self::build_router(frontend, dispatcher),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(frontend: &FrontendConfig, dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(dispatcher)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(RequestBodyLimitLayer::new(frontend.max_body_bytes))
                    .layer(TimeoutLayer::new(frontend.request_timeout())),
            )
    }

    /// The configured router, for serving on a custom transport.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> Response<Body> {
    dispatcher.dispatch(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fetcher, ProxyRequest, ProxyResponse};
    use crate::cache::{CacheStore, StoreConfig};
    use crate::observability::ProxyMetrics;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, request: ProxyRequest) -> (ProxyResponse, bool) {
            let mut headers = HeaderMap::new();
            if let Some(id) = request.headers.get(X_REQUEST_ID) {
                headers.insert("x-upstream-saw", id.clone());
            }
            (
                ProxyResponse {
                    status: StatusCode::OK,
                    headers,
                    body: Body::from(request.path_and_query),
                },
                true,
            )
        }
    }

    struct Stalled;

    #[async_trait]
    impl Fetcher for Stalled {
        async fn fetch(&self, _request: ProxyRequest) -> (ProxyResponse, bool) {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (ProxyResponse::synthetic(), false)
        }
    }

    fn router(frontend: &FrontendConfig) -> Router {
        router_with(frontend, Arc::new(Echo))
    }

    fn router_with(frontend: &FrontendConfig, fetcher: Arc<dyn Fetcher>) -> Router {
        let store = CacheStore::new(StoreConfig {
            max_objects: 10,
            max_cost: 10_000,
            default_ttl: None,
        })
        .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(store),
            fetcher,
            Arc::new(ProxyMetrics::new()),
            false,
        );
        HttpServer::new(Arc::new(dispatcher), frontend).into_router()
    }

    #[tokio::test]
    async fn test_request_id_generated_and_forwarded() {
        let response = router(&FrontendConfig::default())
            .oneshot(
                Request::get("/a/b?c=d")
                    .header("host", "a.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[X_REQUEST_ID].clone();
        assert_eq!(response.headers()["x-upstream-saw"], id);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "/a/b?c=d");
    }

    #[tokio::test]
    async fn test_client_request_id_kept() {
        let response = router(&FrontendConfig::default())
            .oneshot(
                Request::get("/")
                    .header("host", "a.test")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[X_REQUEST_ID], "abc-123");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let frontend = FrontendConfig {
            max_body_bytes: 4,
            ..FrontendConfig::default()
        };
        let response = router(&frontend)
            .oneshot(
                Request::post("/upload")
                    .header("host", "a.test")
                    .header("content-length", "10")
                    .body(Body::from("0123456789"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_slow_backend_hits_request_timeout() {
        let frontend = FrontendConfig {
            request_timeout_secs: 1,
            ..FrontendConfig::default()
        };
        let response = router_with(&frontend, Arc::new(Stalled))
            .oneshot(
                Request::get("/slow")
                    .header("host", "a.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
