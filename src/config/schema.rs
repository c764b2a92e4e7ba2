//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML file.
//! Every section and field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::backend::{BackendTarget, TargetError};
use crate::cache::StoreConfig;
use crate::config::size::{SizeError, SizeValue};

/// Root configuration for the caching proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend used when no virtual host matches.
    pub default_backend: BackendConfig,

    /// Host → backend overrides.
    pub virtual_hosts: BTreeMap<String, BackendConfig>,

    /// Listener and metrics settings.
    pub frontend: FrontendConfig,

    /// Cache limits and key policy.
    pub cache: CacheConfig,

    pub logging: LoggingConfig,
}

/// One backend target.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// `scheme://host[:port]`.
    pub target: String,

    /// Connect + response timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            target: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn to_target(&self) -> Result<BackendTarget, TargetError> {
        BackendTarget::parse(&self.target, Duration::from_secs(self.timeout_secs))
    }
}

/// Frontend listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub listen_address: String,

    /// Prometheus scrape port; 0 disables the endpoint.
    pub metrics_port: u16,

    /// Deadline for a whole request/response exchange in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            metrics_port: 9091,
            request_timeout_secs: 60,
            max_body_bytes: 2_000_000,
        }
    }
}

impl FrontendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum stored objects, e.g. "1M".
    pub max_objects: SizeValue,

    /// Maximum stored body bytes, e.g. "1G".
    pub max_cost: SizeValue,

    /// Leave the host out of cache keys.
    pub ignore_host: bool,

    /// Lifetime of entries without freshness headers; 0 = never expire.
    pub default_ttl_secs: u64,

    /// Period of the expiry sweep; 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_objects: SizeValue::from("1M"),
            max_cost: SizeValue::from("1G"),
            ignore_host: false,
            default_ttl_secs: 300,
            sweep_interval_secs: 1,
        }
    }
}

impl CacheConfig {
    pub fn store_config(&self) -> Result<StoreConfig, SizeError> {
        Ok(StoreConfig {
            max_objects: self.max_objects.resolve()?,
            max_cost: self.max_cost.resolve()?,
            default_ttl: (self.default_ttl_secs > 0)
                .then(|| Duration::from_secs(self.default_ttl_secs)),
        })
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    pub level: String,

    /// text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}
