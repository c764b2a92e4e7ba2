//! Host-based backend selection.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{Fetcher, ProxyRequest, ProxyResponse};

type VirtualHostTable = HashMap<String, Arc<dyn Fetcher>>;

/// Routes each request to the backend registered for its Host header.
pub struct BackendRouter {
    default: Arc<dyn Fetcher>,
    hosts: ArcSwap<VirtualHostTable>,
}

impl BackendRouter {
    pub fn new(default: Arc<dyn Fetcher>) -> Self {
        Self {
            default,
            hosts: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Register (or replace) the backend for `host`. Safe to call while
    /// requests are being routed.
    pub fn add_backend(&self, host: &str, backend: Arc<dyn Fetcher>) {
        let host = host.to_ascii_lowercase();
        self.hosts.rcu(|table| {
            let mut table = VirtualHostTable::clone(table);
            table.insert(host.clone(), backend.clone());
            table
        });
        tracing::debug!(host = %host, "Virtual host registered");
    }

    /// Unregister `host`. Returns whether it was registered.
    pub fn remove_backend(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if !self.hosts.load().contains_key(&host) {
            return false;
        }
        let previous = self.hosts.rcu(|table| {
            let mut table = VirtualHostTable::clone(table);
            table.remove(&host);
            table
        });
        previous.contains_key(&host)
    }

    /// Registered virtual hosts, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.load().keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Backend for `host`: exact match, then the host without its port,
    /// then the default.
    pub fn backend_for(&self, host: &str) -> Arc<dyn Fetcher> {
        let host = host.trim().to_ascii_lowercase();
        let table = self.hosts.load();
        if let Some(backend) = table.get(&host) {
            return backend.clone();
        }
        if let Some(bare) = strip_port(&host) {
            if let Some(backend) = table.get(bare) {
                return backend.clone();
            }
        }
        self.default.clone()
    }
}

#[async_trait]
impl Fetcher for BackendRouter {
    async fn fetch(&self, request: ProxyRequest) -> (ProxyResponse, bool) {
        let backend = self.backend_for(&request.host);
        backend.fetch(request).await
    }
}

/// `host:port` → `host`; `[v6]:port` → `[v6]`. `None` if there is no port.
fn strip_port(host: &str) -> Option<&str> {
    let (name, port) = host.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.starts_with('[') && !name.ends_with(']') {
        return None;
    }
    Some(name)
}
