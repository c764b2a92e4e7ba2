//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize subsystems in dependency order
//! - Start background tasks (expiry sweep, config reload, signals)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order: metrics, cache, backends, router,
//!   dispatcher, then the listener
//! - A reload that fails to build leaves the running virtual hosts intact

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::backend::{BackendClient, TargetError};
use crate::cache::{CacheStore, StoreError};
use crate::config::{load_config, BackendConfig, ConfigError, ConfigWatcher, ProxyConfig, SizeError};
use crate::http::{Dispatcher, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::observability::{init_logging, init_metrics, ProxyMetrics};
use crate::routing::BackendRouter;

/// Fatal error before or while serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("loading config: {0}")]
    Config(#[from] ConfigError),
    #[error("cache limits: {0}")]
    Size(#[from] SizeError),
    #[error("creating cache: {0}")]
    Cache(#[from] StoreError),
    #[error("{backend}: {source}")]
    Backend {
        backend: String,
        #[source]
        source: TargetError,
    },
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("binding {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("watching config: {0}")]
    Watch(#[from] notify::Error),
    #[error("serving: {0}")]
    Serve(#[source] std::io::Error),
}

/// A fully wired proxy, ready to serve.
pub struct Proxy {
    config: ProxyConfig,
    store: Arc<CacheStore>,
    router: Arc<BackendRouter>,
    metrics: Arc<ProxyMetrics>,
    dispatcher: Arc<Dispatcher>,
}

impl Proxy {
    /// Wire cache, backends, router and dispatcher from `config`.
    ///
    /// Does not install logging or the metrics exporter, so it can be
    /// called more than once per process.
    pub fn build(config: ProxyConfig) -> Result<Self, StartupError> {
        let store_config = config.cache.store_config()?;
        tracing::info!(
            max_objects = store_config.max_objects,
            max_cost = store_config.max_cost,
            ignore_host = config.cache.ignore_host,
            "Initializing cache"
        );
        let store = Arc::new(CacheStore::new(store_config)?);

        let default = backend_client("default_backend", &config.default_backend)?;
        tracing::info!(backend = %default.target(), "Default backend configured");
        let router = Arc::new(BackendRouter::new(Arc::new(default)));
        apply_virtual_hosts(&router, &config.virtual_hosts)?;

        let metrics = Arc::new(ProxyMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            router.clone(),
            metrics.clone(),
            config.cache.ignore_host,
        ));

        Ok(Self {
            config,
            store,
            router,
            metrics,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    /// Serve on `listener` until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        let sweeper = self
            .config
            .cache
            .sweep_interval()
            .map(|interval| self.store.clone().spawn_sweeper(interval, shutdown.subscribe()));

        let server = HttpServer::new(self.dispatcher.clone(), &self.config.frontend);
        let result = server.run(listener, shutdown.subscribe()).await;

        // Stop background tasks even if the server failed on its own.
        shutdown.trigger();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        let totals = self.metrics.snapshot();
        tracing::info!(
            hits = totals.hits,
            misses = totals.misses,
            errors = totals.errors,
            cached_objects = self.store.len(),
            "Proxy stopped"
        );
        result.map_err(StartupError::Serve)
    }

    /// Apply virtual-host changes from reloaded configs until shutdown.
    pub fn spawn_reloader(
        &self,
        mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let router = self.router.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => {
                        let Some(config) = update else { break };
                        match apply_virtual_hosts(&router, &config.virtual_hosts) {
                            Ok(()) => tracing::info!(hosts = ?router.hosts(), "Virtual hosts reloaded"),
                            Err(e) => tracing::error!(error = %e, "Virtual host reload failed, keeping current hosts"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Load `path`, install logging and metrics, and serve until SIGINT or
    /// SIGTERM. With `watch`, virtual hosts follow changes to the file.
    pub async fn load_and_run(path: &Path, watch: bool) -> Result<(), StartupError> {
        let config = load_config(path)?;
        if init_logging(&config.logging).is_err() {
            tracing::debug!("Global subscriber already installed");
        }
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            path = %path.display(),
            "caching-proxy starting"
        );

        if config.frontend.metrics_port != 0 {
            init_metrics(SocketAddr::from(([0, 0, 0, 0], config.frontend.metrics_port)))?;
        }

        let proxy = Proxy::build(config)?;

        let address = proxy.config.frontend.listen_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        let shutdown = Arc::new(Shutdown::new());
        spawn_signal_handler(shutdown.clone());

        // Dropping the watcher handle stops the watch, so keep it alive.
        let _watcher = if watch {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            proxy.spawn_reloader(updates, shutdown.subscribe());
            Some(handle)
        } else {
            None
        };

        proxy.run(listener, &shutdown).await
    }
}

fn backend_client(name: &str, config: &BackendConfig) -> Result<BackendClient, StartupError> {
    config
        .to_target()
        .and_then(BackendClient::new)
        .map_err(|source| StartupError::Backend {
            backend: name.to_string(),
            source,
        })
}

/// Make `router`'s virtual hosts match `hosts`. Every client is built
/// before the router is touched.
pub fn apply_virtual_hosts(
    router: &BackendRouter,
    hosts: &BTreeMap<String, BackendConfig>,
) -> Result<(), StartupError> {
    let mut clients = Vec::with_capacity(hosts.len());
    for (host, config) in hosts {
        let client = backend_client(&format!("virtual_hosts.{}", host), config)?;
        clients.push((host.to_ascii_lowercase(), client));
    }

    for existing in router.hosts() {
        if !clients.iter().any(|(host, _)| *host == existing) {
            router.remove_backend(&existing);
            tracing::info!(host = %existing, "Virtual host removed");
        }
    }
    for (host, client) in clients {
        tracing::info!(host = %host, backend = %client.target(), "Virtual host configured");
        router.add_backend(&host, Arc::new(client));
    }
    Ok(())
}
