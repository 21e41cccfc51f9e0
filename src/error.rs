//! Error types for the tiered content cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache tiers
///
/// Most of these never cross the public `DiskCache`/`TieredCache` boundary:
/// they are logged and converted into a miss or a `false` return there.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Origin Errors
    // =========================================================================
    /// Origin could not be reached
    #[error("Origin connection error: {0}")]
    OriginConnection(#[source] reqwest::Error),

    /// Origin answered with a non-success status
    #[error("Origin returned status {status} for {identifier}")]
    OriginStatus { identifier: String, status: u16 },

    /// Origin has no payload for the identifier
    #[error("Origin has no content for: {0}")]
    OriginNotFound(String),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Blob could not be encoded or decoded
    #[error("Codec {codec} failed: {reason}")]
    Codec { codec: String, reason: String },

    // =========================================================================
    // Setup Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a codec error
    pub fn codec(codec: impl Into<String>, reason: impl ToString) -> Self {
        Error::Codec {
            codec: codec.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that a retry may clear (contention, interrupted writes)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}
