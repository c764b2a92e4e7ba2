//! Cache key derivation.
//!
//! Keys are a SHA-256 digest over the request host and path. Query strings,
//! headers and the method are deliberately left out.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a cache key in bytes.
pub const KEY_LEN: usize = 32;

/// Fixed-size opaque cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// With `ignore_host` the digest covers `path` alone, otherwise the
    /// unseparated concatenation `host || path`.
    pub fn derive(host: &str, path: &str, ignore_host: bool) -> Self {
        let mut hasher = Sha256::new();
        if !ignore_host {
            hasher.update(host.as_bytes());
        }
        hasher.update(path.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Read the `index`-th little-endian 64-bit word of the digest.
    ///
    /// The digest is uniformly distributed, so its words double as
    /// independent hash values for sharding and the frequency sketch.
    pub(crate) fn word(&self, index: usize) -> u64 {
        let start = (index % (KEY_LEN / 8)) * 8;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[start..start + 8]);
        u64::from_le_bytes(buf)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        f.write_str("…")
    }
}
