//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, size.rs for K/M/G limits)
//!     → ProxyConfig (validated, immutable)
//!     → lifecycle::startup builds the subsystems from it
//!
//! With --watch:
//!     watcher.rs detects change
//!     → loader.rs loads and validates the new file
//!     → virtual hosts are re-registered on the live router
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only virtual hosts reload live
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod size;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BackendConfig, CacheConfig, FrontendConfig, LoggingConfig, ProxyConfig};
pub use size::{parse_size, SizeError, SizeValue};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
