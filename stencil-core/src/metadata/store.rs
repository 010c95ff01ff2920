//! Metadata store: cached view of the published archetype metadata
//!
//! One store is created per CLI invocation and handed to whatever needs
//! metadata. Lookups prefer the local cache; the remote source is only
//! consulted when the cache is stale, missing or corrupt. A remote failure
//! never hides a usable cached value: it is reported as [`Degraded`] instead.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::{CacheRead, Marker, MetadataCache};
use super::coalesce::Coalescer;
use super::error::MetadataError;
use super::source::{FetchError, RemoteSource, CATALOG_FILE, PROPERTIES_FILE, VERSIONS_PATH};
use crate::catalog::Catalog;
use crate::properties::PropertySet;
use crate::version::{self, Version};

/// How many times a malformed payload is fetched before giving up
const MAX_FETCH_ATTEMPTS: usize = 2;

/// Dedup key for latest-version refreshes
const LATEST_KEY: &str = "latest";

/// Refresh policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPolicy {
    /// Maximum age of the cached latest version before a refresh is attempted
    pub stale_after: Duration,
}

impl Default for MetadataPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Time of the last successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastUpdate {
    Never,
    At(DateTime<Utc>),
}

impl LastUpdate {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            LastUpdate::Never => None,
            LastUpdate::At(time) => Some(*time),
        }
    }
}

impl fmt::Display for LastUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastUpdate::Never => f.write_str("never"),
            LastUpdate::At(time) => write!(f, "{}", time.to_rfc3339()),
        }
    }
}

/// Why a lookup was served from stale data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded {
    pub reason: String,
    pub last_update: LastUpdate,
}

/// A lookup result, possibly served from stale cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub degraded: Option<Degraded>,
}

impl<T> Resolved<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            degraded: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Cached access to the remote archetype metadata
pub struct MetadataStore {
    source: Arc<dyn RemoteSource>,
    cache: MetadataCache,
    policy: MetadataPolicy,
    refreshes: Coalescer<Version>,
    properties: Coalescer<PropertySet>,
    catalogs: Coalescer<Catalog>,
}

impl MetadataStore {
    /// Open the store over `cache_root`
    ///
    /// Only touches the local filesystem; nothing is fetched until a lookup
    /// needs it.
    pub fn new(
        source: Arc<dyn RemoteSource>,
        cache_root: impl Into<PathBuf>,
        policy: MetadataPolicy,
    ) -> Result<Self, MetadataError> {
        let cache = MetadataCache::open(cache_root)?;
        debug!(
            "Metadata store ready (cache: {}, source: {})",
            cache.root().display(),
            source.describe()
        );

        Ok(Self {
            source,
            cache,
            policy,
            refreshes: Coalescer::new(),
            properties: Coalescer::new(),
            catalogs: Coalescer::new(),
        })
    }

    pub fn cache_root(&self) -> &Path {
        self.cache.root()
    }

    pub fn policy(&self) -> MetadataPolicy {
        self.policy
    }

    /// When the latest version was last refreshed from the remote source
    pub fn last_update_time(&self) -> LastUpdate {
        match self.cache.read_marker() {
            CacheRead::Hit(marker) => LastUpdate::At(marker.last_update_time),
            CacheRead::Miss | CacheRead::Corrupt(_) => LastUpdate::Never,
        }
    }

    /// The latest published version
    ///
    /// Served from cache while fresh. Once stale, one refresh is attempted;
    /// if it fails the stale value is returned as [`Degraded`].
    pub async fn latest_version(&self) -> Result<Resolved<Version>, MetadataError> {
        let cached = self.cached_marker();

        if let Some(marker) = &cached {
            if self.is_fresh(marker) {
                debug!("Using cached latest version {}", marker.latest_version);
                return Ok(Resolved::fresh(marker.latest_version.clone()));
            }
        }

        match self
            .refreshes
            .run(LATEST_KEY, || self.refresh_latest())
            .await
        {
            Ok(latest) => Ok(Resolved::fresh(latest)),
            Err(e) => match cached {
                Some(marker) => {
                    warn!(
                        "Failed to refresh metadata from {}; using cached latest version {}: {}",
                        self.source.describe(),
                        marker.latest_version,
                        e
                    );
                    Ok(Resolved {
                        value: marker.latest_version,
                        degraded: Some(Degraded {
                            reason: e.to_string(),
                            last_update: LastUpdate::At(marker.last_update_time),
                        }),
                    })
                }
                None => Err(match e {
                    MetadataError::MetadataUnavailable(_) => e,
                    other => MetadataError::MetadataUnavailable(other.to_string()),
                }),
            },
        }
    }

    /// Metadata properties published for `version`
    pub async fn properties_of(&self, version: &Version) -> Result<PropertySet, MetadataError> {
        if let CacheRead::Hit(properties) = self.cache.read_properties(version) {
            debug!("Using cached properties for {}", version);
            return Ok(properties);
        }

        // Corrupt entries are discarded inside the run, never by a bystander
        self.properties
            .run(&version.key(), || self.fetch_properties(version))
            .await
    }

    /// Archetype catalog published for `version`
    pub async fn catalog_of(&self, version: &Version) -> Result<Catalog, MetadataError> {
        if let CacheRead::Hit(catalog) = self.cache.read_catalog(version) {
            debug!("Using cached catalog for {}", version);
            return Ok(catalog);
        }

        self.catalogs
            .run(&version.key(), || self.fetch_catalog(version))
            .await
    }

    fn cached_marker(&self) -> Option<Marker> {
        match self.cache.read_marker() {
            CacheRead::Hit(marker) => Some(marker),
            CacheRead::Miss | CacheRead::Corrupt(_) => None,
        }
    }

    fn is_fresh(&self, marker: &Marker) -> bool {
        // A timestamp in the future (clock skew) counts as age zero
        let age = Utc::now()
            .signed_duration_since(marker.last_update_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < self.policy.stale_after
    }

    async fn refresh_latest(&self) -> Result<Version, MetadataError> {
        // Another run may have refreshed while this one waited for its turn
        match self.cache.read_marker() {
            CacheRead::Hit(marker) if self.is_fresh(&marker) => {
                return Ok(marker.latest_version);
            }
            CacheRead::Corrupt(reason) => {
                warn!("Discarding corrupt metadata marker: {}", reason);
                self.cache.discard_marker();
            }
            CacheRead::Hit(_) | CacheRead::Miss => {}
        }

        debug!("Refreshing latest version from {}", self.source.describe());
        let latest = self
            .fetch_validated(VERSIONS_PATH, parse_versions)
            .await
            .map_err(|e| MetadataError::MetadataUnavailable(e.to_string()))?;

        let marker = Marker {
            last_update_time: Utc::now(),
            latest_version: latest.clone(),
        };
        if let Err(e) = self.cache.write_marker(&marker) {
            warn!("Failed to save metadata marker: {}", e);
        }

        info!("Latest metadata version is {}", latest);
        Ok(latest)
    }

    async fn fetch_properties(&self, version: &Version) -> Result<PropertySet, MetadataError> {
        // Another run may have healed the entry while this one waited
        match self.cache.read_properties(version) {
            CacheRead::Hit(properties) => return Ok(properties),
            CacheRead::Corrupt(reason) => {
                warn!(
                    "Discarding corrupt cached properties for {}: {}",
                    version, reason
                );
                self.cache.discard_properties(version);
            }
            CacheRead::Miss => {}
        }

        let path = format!("{version}/{PROPERTIES_FILE}");
        let properties = self
            .fetch_validated(&path, |bytes| {
                PropertySet::parse(bytes).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| match e {
                FetchError::NotFound(_) => MetadataError::UnknownVersion(version.to_string()),
                FetchError::Unreachable(reason) => MetadataError::MetadataUnavailable(reason),
                FetchError::Malformed(reason) => MetadataError::CorruptProperties {
                    version: version.to_string(),
                    reason,
                },
            })?;

        // Caching is best effort
        if let Err(e) = self.cache.write_properties(version, &properties) {
            warn!("Failed to cache properties for {}: {}", version, e);
        }

        Ok(properties)
    }

    async fn fetch_catalog(&self, version: &Version) -> Result<Catalog, MetadataError> {
        match self.cache.read_catalog(version) {
            CacheRead::Hit(catalog) => return Ok(catalog),
            CacheRead::Corrupt(reason) => {
                warn!("Discarding corrupt cached catalog for {}: {}", version, reason);
                self.cache.discard_catalog(version);
            }
            CacheRead::Miss => {}
        }

        let path = format!("{version}/{CATALOG_FILE}");
        let catalog = self
            .fetch_validated(&path, |bytes| {
                Catalog::parse(version.clone(), bytes).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| match e {
                FetchError::NotFound(_) => MetadataError::UnknownVersion(version.to_string()),
                FetchError::Unreachable(reason) => MetadataError::MetadataUnavailable(reason),
                FetchError::Malformed(reason) => MetadataError::CorruptCatalog {
                    version: version.to_string(),
                    reason,
                },
            })?;

        if let Err(e) = self.cache.write_catalog(version, &catalog) {
            warn!("Failed to cache catalog for {}: {}", version, e);
        }

        debug!("Fetched catalog for {} ({} entries)", version, catalog.len());
        Ok(catalog)
    }

    /// Fetch `path` and parse it, re-fetching once if the payload is malformed
    async fn fetch_validated<T, P>(&self, path: &str, parse: P) -> Result<T, FetchError>
    where
        P: Fn(&[u8]) -> Result<T, String> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let reason = match self.source.fetch(path).await {
                Ok(bytes) => match parse(&bytes) {
                    Ok(value) => return Ok(value),
                    Err(reason) => reason,
                },
                Err(FetchError::Malformed(reason)) => reason,
                Err(e) => return Err(e),
            };

            if attempt >= MAX_FETCH_ATTEMPTS {
                return Err(FetchError::Malformed(reason));
            }
            warn!("Malformed payload at {} ({}), fetching again", path, reason);
        }
    }
}

/// Pick the latest entry of a published versions list
fn parse_versions(bytes: &[u8]) -> Result<Version, String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "versions list is not valid UTF-8")?;

    let candidates = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Version::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    version::latest(candidates).map_err(|e| e.to_string())
}
