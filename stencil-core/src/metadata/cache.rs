//! On-disk metadata cache
//!
//! ```text
//! <root>/metadata.yaml                          ← lastUpdateTime + latestVersion
//! <root>/versions/<key>/metadata.properties
//! <root>/versions/<key>/catalog.yaml
//! ```
//!
//! The directory is shared by every CLI process on the machine. All writes go
//! to a temporary file in the destination directory and are published with a
//! rename, so readers see either the old entry or the complete new one.
//!
//! Every entry ends with an integrity trailer carrying the payload length and
//! its SHA-256. An entry whose trailer is missing or does not match (for
//! example after truncation) reads as [`CacheRead::Corrupt`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::MetadataError;
use super::source::{CATALOG_FILE, PROPERTIES_FILE};
use crate::catalog::Catalog;
use crate::properties::PropertySet;
use crate::version::Version;

/// Marker file name
const MARKER_FILE: &str = "metadata.yaml";

/// Directory holding per-version entries
const VERSIONS_DIR: &str = "versions";

/// Prefix of the last line of every entry
const TRAILER_PREFIX: &str = "#stencil-integrity ";

/// Persisted freshness marker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkerDocument {
    last_update_time: DateTime<Utc>,
    latest_version: String,
}

/// The cache's view of the last successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub last_update_time: DateTime<Utc>,
    pub latest_version: Version,
}

/// Outcome of reading one cache entry
#[derive(Debug)]
pub enum CacheRead<T> {
    Hit(T),
    Miss,
    /// Present but unusable; carries the reason
    Corrupt(String),
}

/// Handle on the local metadata cache directory
#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
}

impl MetadataCache {
    /// Open (creating if needed) the cache at `root`
    ///
    /// Fails only when the location cannot be created, listed or written.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let root = root.into();
        let init_error = |reason: String| MetadataError::CacheInit {
            path: root.clone(),
            reason,
        };

        std::fs::create_dir_all(root.join(VERSIONS_DIR))
            .map_err(|e| init_error(format!("cannot create directory: {e}")))?;

        std::fs::read_dir(&root).map_err(|e| init_error(format!("cannot read directory: {e}")))?;

        tempfile::NamedTempFile::new_in(&root)
            .map_err(|e| init_error(format!("directory is not writable: {e}")))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    fn version_dir(&self, version: &Version) -> PathBuf {
        self.root.join(VERSIONS_DIR).join(version.key())
    }

    pub fn properties_path(&self, version: &Version) -> PathBuf {
        self.version_dir(version).join(PROPERTIES_FILE)
    }

    pub fn catalog_path(&self, version: &Version) -> PathBuf {
        self.version_dir(version).join(CATALOG_FILE)
    }

    pub fn read_marker(&self) -> CacheRead<Marker> {
        let content = match read_entry(&self.marker_path()) {
            CacheRead::Hit(bytes) => bytes,
            CacheRead::Miss => return CacheRead::Miss,
            CacheRead::Corrupt(reason) => return CacheRead::Corrupt(reason),
        };

        let Ok(text) = std::str::from_utf8(&content) else {
            return CacheRead::Corrupt("marker is not valid UTF-8".to_string());
        };

        let document: MarkerDocument = match serde_yaml_ng::from_str(text) {
            Ok(document) => document,
            Err(e) => return CacheRead::Corrupt(format!("invalid marker: {e}")),
        };

        match Version::parse(&document.latest_version) {
            Ok(latest_version) => CacheRead::Hit(Marker {
                last_update_time: document.last_update_time,
                latest_version,
            }),
            Err(e) => CacheRead::Corrupt(e.to_string()),
        }
    }

    pub fn write_marker(&self, marker: &Marker) -> Result<(), MetadataError> {
        let path = self.marker_path();
        let document = MarkerDocument {
            last_update_time: marker.last_update_time,
            latest_version: marker.latest_version.to_string(),
        };
        let content = serde_yaml_ng::to_string(&document).map_err(|e| MetadataError::CacheWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&path, content.as_bytes())
    }

    pub fn discard_marker(&self) {
        discard(&self.marker_path());
    }

    pub fn read_properties(&self, version: &Version) -> CacheRead<PropertySet> {
        match read_entry(&self.properties_path(version)) {
            CacheRead::Hit(bytes) => match PropertySet::parse(&bytes) {
                Ok(props) => CacheRead::Hit(props),
                Err(e) => CacheRead::Corrupt(e.to_string()),
            },
            CacheRead::Miss => CacheRead::Miss,
            CacheRead::Corrupt(reason) => CacheRead::Corrupt(reason),
        }
    }

    pub fn write_properties(
        &self,
        version: &Version,
        properties: &PropertySet,
    ) -> Result<(), MetadataError> {
        atomic_write(
            &self.properties_path(version),
            properties.to_payload().as_bytes(),
        )
    }

    pub fn discard_properties(&self, version: &Version) {
        discard(&self.properties_path(version));
    }

    pub fn read_catalog(&self, version: &Version) -> CacheRead<Catalog> {
        match read_entry(&self.catalog_path(version)) {
            CacheRead::Hit(bytes) => match Catalog::parse(version.clone(), &bytes) {
                Ok(catalog) => CacheRead::Hit(catalog),
                Err(e) => CacheRead::Corrupt(e.to_string()),
            },
            CacheRead::Miss => CacheRead::Miss,
            CacheRead::Corrupt(reason) => CacheRead::Corrupt(reason),
        }
    }

    pub fn write_catalog(&self, version: &Version, catalog: &Catalog) -> Result<(), MetadataError> {
        let path = self.catalog_path(version);
        let content = catalog.to_yaml().map_err(|e| MetadataError::CacheWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&path, content.as_bytes())
    }

    pub fn discard_catalog(&self, version: &Version) {
        discard(&self.catalog_path(version));
    }
}

fn read_entry(path: &Path) -> CacheRead<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => match unseal(&bytes) {
            Ok(payload) => CacheRead::Hit(payload.to_vec()),
            Err(reason) => CacheRead::Corrupt(format!("{}: {reason}", path.display())),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheRead::Miss,
        Err(e) => CacheRead::Corrupt(format!("cannot read {}: {e}", path.display())),
    }
}

/// Write `bytes` to a sibling temp file, sync it, then rename over `path`
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), MetadataError> {
    let write_error = |reason: String| MetadataError::CacheWrite {
        path: path.to_path_buf(),
        reason,
    };

    let parent = path
        .parent()
        .ok_or_else(|| write_error("path has no parent directory".to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| write_error(e.to_string()))?;
    temp.write_all(&seal(bytes)).map_err(|e| write_error(e.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| write_error(e.to_string()))?;
    temp.persist(path)
        .map_err(|e| write_error(e.error.to_string()))?;

    tracing::debug!("Wrote metadata cache entry: {}", path.display());
    Ok(())
}

/// Append the integrity trailer: `payload \n #stencil-integrity length=N sha256=HEX \n`
fn seal(payload: &[u8]) -> Vec<u8> {
    let trailer = format!(
        "{TRAILER_PREFIX}length={} sha256={}\n",
        payload.len(),
        hex::encode(Sha256::digest(payload))
    );
    let mut sealed = Vec::with_capacity(payload.len() + 1 + trailer.len());
    sealed.extend_from_slice(payload);
    sealed.push(b'\n');
    sealed.extend_from_slice(trailer.as_bytes());
    sealed
}

/// Strip and verify the integrity trailer, returning the payload
fn unseal(bytes: &[u8]) -> Result<&[u8], String> {
    let body = bytes
        .strip_suffix(b"\n")
        .ok_or_else(|| "missing integrity trailer".to_string())?;
    let split = body
        .iter()
        .rposition(|b| *b == b'\n')
        .ok_or_else(|| "missing integrity trailer".to_string())?;
    let (payload, trailer) = (&body[..split], &body[split + 1..]);

    let trailer = std::str::from_utf8(trailer)
        .ok()
        .and_then(|t| t.strip_prefix(TRAILER_PREFIX))
        .ok_or_else(|| "missing integrity trailer".to_string())?;

    let mut length = None;
    let mut digest = None;
    for field in trailer.split_whitespace() {
        match field.split_once('=') {
            Some(("length", value)) => length = value.parse::<usize>().ok(),
            Some(("sha256", value)) => digest = Some(value),
            _ => {}
        }
    }

    match (length, digest) {
        (Some(length), _) if length != payload.len() => Err(format!(
            "length mismatch (expected {length} bytes, found {})",
            payload.len()
        )),
        (Some(_), Some(digest)) if digest == hex::encode(Sha256::digest(payload)) => Ok(payload),
        (Some(_), Some(_)) => Err("checksum mismatch".to_string()),
        _ => Err("malformed integrity trailer".to_string()),
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Discarded cache entry: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to discard cache entry {}: {}", path.display(), e),
    }
}
