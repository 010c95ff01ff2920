//! Remote metadata sources
//!
//! The published metadata is a small tree of files:
//!
//! ```text
//! <base>/versions                         ← one published version per line
//! <base>/<version>/metadata.properties    ← key=value properties
//! <base>/<version>/catalog.yaml           ← archetype catalog
//! ```
//!
//! Any transport able to return those bytes can back a [`RemoteSource`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Path of the published versions list
pub const VERSIONS_PATH: &str = "versions";

/// Name of the per-version properties payload
pub const PROPERTIES_FILE: &str = "metadata.properties";

/// Name of the per-version catalog payload
pub const CATALOG_FILE: &str = "catalog.yaml";

/// Failures reported by a remote source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Remote metadata unreachable: {0}")]
    Unreachable(String),

    #[error("Remote metadata not found: {0}")]
    NotFound(String),

    #[error("Malformed remote metadata: {0}")]
    Malformed(String),
}

/// Capability to fetch raw metadata payloads by relative path
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the bytes stored at `path` relative to the source root
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;

    /// Human-readable location for logging
    fn describe(&self) -> String;
}

/// Reads metadata from a local directory laid out like the remote tree
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteSource for FileSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(FetchError::Unreachable(format!(
                "{} does not exist",
                self.root.display()
            )));
        }

        let file = self.root.join(path);
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(file.display().to_string()))
            }
            Err(e) => Err(FetchError::Unreachable(format!(
                "{}: {}",
                file.display(),
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Fetches metadata over HTTP(S)
#[cfg(feature = "http")]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stencil/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Unreachable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url));
        }
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("HTTP {status} from {url}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unreachable(format!("Failed to read body of {url}: {e}")))?;

        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// Pick a source for a configured metadata location
///
/// `http://` and `https://` URLs fetch over the network; `file://` URLs and
/// bare paths read a local mirror.
pub fn source_for(location: &str, timeout: Duration) -> Result<Arc<dyn RemoteSource>, FetchError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return http_source(location, timeout);
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Arc::new(FileSource::new(path)))
}

#[cfg(feature = "http")]
fn http_source(location: &str, timeout: Duration) -> Result<Arc<dyn RemoteSource>, FetchError> {
    Ok(Arc::new(HttpSource::new(location, timeout)?))
}

#[cfg(not(feature = "http"))]
fn http_source(location: &str, _timeout: Duration) -> Result<Arc<dyn RemoteSource>, FetchError> {
    Err(FetchError::Unreachable(format!(
        "Cannot fetch {location}: HTTP support is not enabled. Rebuild with --features http"
    )))
}
