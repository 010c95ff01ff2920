//! Stencil Core - archetype metadata and plugin support for the Stencil CLI
//!
//! - [`version`]: version ordering and latest-version selection
//! - [`properties`] and [`catalog`]: the published metadata documents
//! - [`metadata`]: cached access to a remote metadata source
//! - [`plugin`]: time-limited execution of external helper programs
//! - [`config`]: layered configuration

pub mod catalog;
pub mod config;
pub mod metadata;
pub mod plugin;
pub mod properties;
pub mod version;

pub use catalog::{Catalog, CatalogEntry};
pub use config::StencilConfig;
pub use metadata::{MetadataError, MetadataPolicy, MetadataStore};
pub use plugin::{PluginBridge, PluginError, PluginInvocation, PluginOutcome, PluginResolver};
pub use properties::PropertySet;
pub use version::{Version, VersionError};
