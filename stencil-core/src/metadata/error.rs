use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the metadata store
///
/// `Clone` so that callers waiting on a coalesced fetch can all observe the
/// same failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetadataError {
    #[error("Failed to initialize metadata cache at {}: {reason}", path.display())]
    CacheInit { path: PathBuf, reason: String },

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Unknown metadata version '{0}'")]
    UnknownVersion(String),

    #[error("Corrupt catalog for version {version}: {reason}")]
    CorruptCatalog { version: String, reason: String },

    #[error("Corrupt properties for version {version}: {reason}")]
    CorruptProperties { version: String, reason: String },

    #[error("Failed to write metadata cache {}: {reason}", path.display())]
    CacheWrite { path: PathBuf, reason: String },
}
