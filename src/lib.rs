//! Caching HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  CACHING PROXY                   │
//!                      │                                                  │
//!   Client Request     │  ┌─────────┐    ┌────────────┐    ┌──────────┐   │
//!   ───────────────────┼─▶│  http   │───▶│ dispatcher │───▶│  cache   │   │
//!                      │  │ server  │    │ GET/HEAD?  │◀───│  store   │   │
//!                      │  └─────────┘    └─────┬──────┘    └──────────┘   │
//!                      │                       │ miss / other methods     │
//!                      │                       ▼                          │
//!   Client Response    │                ┌────────────┐    ┌──────────┐   │
//!   ◀──────────────────┼────────────────│  routing   │───▶│ backend  │◀──┼── Origin
//!                      │                │ (by Host)  │    │  client  │   │
//!                      │                └────────────┘    └──────────┘   │
//!                      │                                                  │
//!                      │  config · observability · lifecycle              │
//!                      └──────────────────────────────────────────────────┘
//! ```
//!
//! Embedding: build a [`Proxy`] from a [`ProxyConfig`] and run it on a
//! listener with a [`Shutdown`] handle.

// Core subsystems
pub mod backend;
pub mod cache;
pub mod config;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Proxy, Shutdown, StartupError};
