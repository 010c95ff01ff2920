//! Archetype catalog model
//!
//! A catalog lists the project templates ("archetypes") published for one
//! metadata version. The payload is YAML:
//!
//! ```yaml
//! entries:
//!   - artifactId: bare-se
//!     version: 2.0.0
//!     name: bare
//!     summary: Minimal SE project
//!     tags: se,bare
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::Version;

/// Error parsing a catalog payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogParseError {
    #[error("Catalog payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Failed to parse catalog YAML: {0}")]
    Yaml(String),

    #[error("Catalog entry {index} has an empty '{field}'")]
    EmptyField { index: usize, field: &'static str },
}

/// One archetype in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    artifact_id: String,
    version: String,
    name: String,
    summary: String,
    tags: Vec<String>,
}

impl CatalogEntry {
    pub fn new(
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        summary: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            version: version.into(),
            name: name.into(),
            summary: summary.into(),
            tags,
        }
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Tags in declaration order
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// The archetypes published for a metadata version, in catalog order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    version: Version,
    entries: Vec<CatalogEntry>,
}

/// On-the-wire shape of the catalog
#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    entries: Vec<EntryDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryDocument {
    artifact_id: String,
    version: String,
    name: String,
    summary: String,
    /// Comma-joined
    tags: String,
}

impl Catalog {
    pub fn new(version: Version, entries: Vec<CatalogEntry>) -> Self {
        Self { version, entries }
    }

    /// Parse a raw payload for `version`
    pub fn parse(version: Version, bytes: &[u8]) -> Result<Self, CatalogParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CatalogParseError::InvalidUtf8)?;
        Self::from_yaml(version, text)
    }

    /// Parse catalog YAML for `version`
    ///
    /// Every entry must carry all fields; nothing is silently dropped.
    pub fn from_yaml(version: Version, content: &str) -> Result<Self, CatalogParseError> {
        let document: CatalogDocument = serde_yaml_ng::from_str(content)
            .map_err(|e| CatalogParseError::Yaml(e.to_string()))?;

        let mut entries = Vec::with_capacity(document.entries.len());
        for (index, entry) in document.entries.into_iter().enumerate() {
            if entry.artifact_id.trim().is_empty() {
                return Err(CatalogParseError::EmptyField {
                    index,
                    field: "artifactId",
                });
            }
            if entry.name.trim().is_empty() {
                return Err(CatalogParseError::EmptyField {
                    index,
                    field: "name",
                });
            }

            let tags = entry
                .tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();

            entries.push(CatalogEntry {
                artifact_id: entry.artifact_id,
                version: entry.version,
                name: entry.name,
                summary: entry.summary,
                tags,
            });
        }

        Ok(Self { version, entries })
    }

    /// Serialize to the payload format
    pub fn to_yaml(&self) -> Result<String, CatalogParseError> {
        let document = CatalogDocument {
            entries: self
                .entries
                .iter()
                .map(|e| EntryDocument {
                    artifact_id: e.artifact_id.clone(),
                    version: e.version.clone(),
                    name: e.name.clone(),
                    summary: e.summary.clone(),
                    tags: e.tags.join(","),
                })
                .collect(),
        };
        serde_yaml_ng::to_string(&document).map_err(|e| CatalogParseError::Yaml(e.to_string()))
    }

    /// The metadata version this catalog belongs to
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into numbered `archetype.<n>.<field>` properties for display
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.entries.len() * 5);
        for (i, entry) in self.entries.iter().enumerate() {
            let prefix = format!("archetype.{}", i + 1);
            out.push((format!("{prefix}.artifactId"), entry.artifact_id.clone()));
            out.push((format!("{prefix}.version"), entry.version.clone()));
            out.push((format!("{prefix}.title"), entry.summary.clone()));
            out.push((format!("{prefix}.name"), entry.name.clone()));
            out.push((format!("{prefix}.tags"), entry.tags.join(",")));
        }
        out
    }
}
