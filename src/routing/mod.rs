//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (host as sent by the client)
//!     → router.rs normalizes the host (lowercase, then without port)
//!     → VirtualHostTable lookup (exact host → backend)
//!     → fall back to the default backend when nothing matches
//!     → delegate the fetch to the chosen backend
//! ```
//!
//! # Design Decisions
//! - The table is an immutable snapshot behind `ArcSwap`; lookups never lock
//! - Registration copies the table and swaps it in (rare writes, frequent reads)
//! - The default backend is fixed for the router's lifetime

pub mod router;

pub use router::BackendRouter;
