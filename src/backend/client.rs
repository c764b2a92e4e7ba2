//! Backend client bound to a single fixed target.
//!
//! # Responsibilities
//! - Send every request to the configured (scheme, host, port)
//! - Present the client's original Host header to the backend
//! - Convert connection failures into a synthetic 500
//!
//! # Design Decisions
//! - Redirects are returned to the client, never followed
//! - Environment proxy settings are ignored
//! - Response bodies stream through; the dispatcher decides whether to buffer

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header;
use futures_util::TryStreamExt;
use std::fmt;

use crate::backend::target::{BackendTarget, TargetError};
use crate::backend::{Fetcher, ProxyRequest, ProxyResponse};

/// HTTP client for one backend target. Connections are pooled.
#[derive(Clone)]
pub struct BackendClient {
    target: BackendTarget,
    http: reqwest::Client,
}

impl BackendClient {
    /// Build a client for `target`. The target's timeout bounds connect and
    /// the whole exchange.
    pub fn new(target: BackendTarget) -> Result<Self, TargetError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(target.timeout)
            .timeout(target.timeout)
            .build()?;
        Ok(Self { target, http })
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
impl Fetcher for BackendClient {
    async fn fetch(&self, request: ProxyRequest) -> (ProxyResponse, bool) {
        let url = format!("{}{}", self.target.origin(), request.path_and_query);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(request.headers)
            .header(header::HOST, request.host.as_str());
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let backend = self.target.to_string();
                let stream = response.bytes_stream().inspect_err(move |e| {
                    tracing::warn!(backend = %backend, error = %e, "Backend body stream failed");
                });
                (
                    ProxyResponse {
                        status,
                        headers,
                        body: Body::from_stream(stream),
                    },
                    true,
                )
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.target,
                    host = %request.host,
                    method = %request.method,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Backend request failed"
                );
                (ProxyResponse::synthetic(), false)
            }
        }
    }
}
