//! Stencil metadata - latest version, per-version properties and catalogs
//!
//! # Architecture
//!
//! ```text
//! Remote (HTTP or local mirror)
//!     │
//!     ├── versions                       ← published versions
//!     └── <version>/metadata.properties
//!         <version>/catalog.yaml
//!            │
//!            ▼
//!     MetadataStore ── Coalescer (one fetch per key)
//!            │
//!            ▼
//!     <cache>/metadata.yaml              ← lastUpdateTime, latestVersion
//!     <cache>/versions/<key>/...         ← atomically published entries
//! ```

mod cache;
mod coalesce;
mod error;
mod source;
mod store;

pub use cache::{CacheRead, Marker, MetadataCache};
pub use coalesce::Coalescer;
pub use error::MetadataError;
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{
    source_for, FetchError, FileSource, RemoteSource, CATALOG_FILE, PROPERTIES_FILE, VERSIONS_PATH,
};
pub use store::{Degraded, LastUpdate, MetadataPolicy, MetadataStore, Resolved};
