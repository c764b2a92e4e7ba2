//! Backend target addressing.

use std::fmt;
use std::time::Duration;
use url::Url;

/// Default per-call timeout for a backend.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for target parsing.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid backend url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {scheme:?} in {url:?} (expected http or https)")]
    Scheme { url: String, scheme: String },
    #[error("backend url {0:?} has no host")]
    MissingHost(String),
    #[error("failed to build backend client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where a backend client connects. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl BackendTarget {
    /// Parse `scheme://host[:port]`. A missing port defaults per scheme.
    pub fn parse(target: &str, timeout: Duration) -> Result<Self, TargetError> {
        let url = Url::parse(target).map_err(|source| TargetError::Url {
            url: target.to_string(),
            source,
        })?;

        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(TargetError::Scheme {
                url: target.to_string(),
                scheme,
            });
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetError::MissingHost(target.to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        Ok(Self {
            scheme,
            host,
            port,
            timeout,
        })
    }

    /// `scheme://host:port` with no trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
