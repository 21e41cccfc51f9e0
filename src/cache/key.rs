//! Cache Key Derivation
//!
//! Content-addressable keys: a SHA-256 digest of the source identifier,
//! rendered as 64 lowercase hex characters. Safe to use as a file name on
//! every platform.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed-width, filesystem-safe key derived from a source identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of a derived key in characters
    pub const LEN: usize = 64;

    /// Derive the key for an identifier.
    ///
    /// An empty identifier yields an empty key, which callers read as
    /// "do not cache".
    pub fn derive(identifier: &str) -> Self {
        if identifier.is_empty() {
            return Self(String::new());
        }
        Self(format!("{:x}", Sha256::digest(identifier.as_bytes())))
    }

    /// Key as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the key of an empty identifier
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this looks like a derived key (64 lowercase hex chars)
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================
