//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every backend target parses to http(s)://host[:port]
//! - Check cache limits resolve to non-zero sizes
//! - Check listen address and logging settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::backend::TargetError;
use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::config::size::{SizeError, SizeValue};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];

/// A single semantic problem in the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{backend}: {source}")]
    Target {
        backend: String,
        #[source]
        source: TargetError,
    },
    #[error("{backend}: timeout_secs must be greater than 0")]
    ZeroTimeout { backend: String },
    #[error("virtual_hosts: host name must not be empty")]
    EmptyHost,
    #[error("cache.{field}: {source}")]
    Size {
        field: &'static str,
        #[source]
        source: SizeError,
    },
    #[error("cache.{field} must be greater than 0")]
    ZeroLimit { field: &'static str },
    #[error("frontend.listen_address {0:?} is not a valid socket address")]
    ListenAddress(String),
    #[error("frontend.request_timeout_secs must be greater than 0")]
    ZeroRequestTimeout,
    #[error("logging.level {0:?} is not one of trace, debug, info, warn, error")]
    LogLevel(String),
    #[error("logging.format {0:?} is not one of text, json")]
    LogFormat(String),
}

/// Validate `config`, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_backend("default_backend", &config.default_backend, &mut errors);
    for (host, backend) in &config.virtual_hosts {
        if host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost);
            continue;
        }
        check_backend(&format!("virtual_hosts.{}", host), backend, &mut errors);
    }

    check_limit("max_objects", &config.cache.max_objects, &mut errors);
    check_limit("max_cost", &config.cache.max_cost, &mut errors);

    if config.frontend.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::ListenAddress(
            config.frontend.listen_address.clone(),
        ));
    }
    if config.frontend.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.logging.level.clone()));
    }
    let format = config.logging.format.to_ascii_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        errors.push(ValidationError::LogFormat(config.logging.format.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend(name: &str, backend: &BackendConfig, errors: &mut Vec<ValidationError>) {
    if let Err(source) = backend.to_target() {
        errors.push(ValidationError::Target {
            backend: name.to_string(),
            source,
        });
    }
    if backend.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout {
            backend: name.to_string(),
        });
    }
}

fn check_limit(field: &'static str, value: &SizeValue, errors: &mut Vec<ValidationError>) {
    match value.resolve() {
        Ok(0) => errors.push(ValidationError::ZeroLimit { field }),
        Ok(_) => {}
        Err(source) => errors.push(ValidationError::Size { field, source }),
    }
}
