//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET/HEAD request (host, path)
//!     → key.rs (SHA-256 over host || path, or path alone)
//!     → store.rs lookup (expired entries are invisible)
//!
//! Backend response (status, headers, body)
//!     → ttl.rs (Cache-Control / Expires / Age → Ttl)
//!     → entry.rs (immutable CacheEntry, cost = body length)
//!     → store.rs admission (sketch.rs frequency vs. sampled victims)
//! ```
//!
//! # Design Decisions
//! - Two independent budgets: object count and aggregate body bytes
//! - Budget is reserved before an entry becomes visible, so the running
//!   totals never exceed the configured maximums
//! - Sharded locks; unrelated keys never contend on a global lock
//! - Eviction is approximate (sampled LFU with TinyLFU-style admission)

pub mod entry;
pub mod key;
pub mod sketch;
pub mod store;
pub mod ttl;

use std::sync::Arc;
use std::time::Duration;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use store::{CacheStore, StoreConfig, StoreError};
pub use ttl::Ttl;

/// Capability set the dispatcher needs from a response cache.
///
/// Any concurrent key-value store that can answer these four calls can sit
/// behind the dispatcher.
pub trait Cache: Send + Sync {
    /// Look up a live entry. Expired entries are reported as absent.
    fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>>;

    /// Insert or replace, deriving the lifetime from the entry's headers.
    ///
    /// Returns `true` if the entry was admitted.
    fn set(&self, key: CacheKey, entry: CacheEntry) -> bool;

    /// Insert or replace with a caller-chosen lifetime.
    fn set_with_ttl(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> bool;

    /// Lifetime applied to entries whose headers yield [`Ttl::Default`].
    /// `None` means such entries never expire.
    fn default_ttl(&self) -> Option<Duration>;
}
