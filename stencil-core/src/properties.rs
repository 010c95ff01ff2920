//! Key/value property sets
//!
//! Per-version metadata properties are published as newline-delimited
//! `key=value` text. The same format backs the per-project config file.

use std::collections::BTreeMap;

use thiserror::Error;

/// Error parsing a properties payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertiesParseError {
    #[error("Properties payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Line {line}: expected 'key=value', found '{content}'")]
    MissingSeparator { line: usize, content: String },

    #[error("Line {line}: empty key")]
    EmptyKey { line: usize },
}

/// Ordered mapping of property names to values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    entries: BTreeMap<String, String>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw payload, rejecting anything that is not `key=value` lines
    pub fn parse(bytes: &[u8]) -> Result<Self, PropertiesParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PropertiesParseError::InvalidUtf8)?;
        Self::parse_str(text)
    }

    pub fn parse_str(text: &str) -> Result<Self, PropertiesParseError> {
        let mut entries = BTreeMap::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) =
                line.split_once('=')
                    .ok_or_else(|| PropertiesParseError::MissingSeparator {
                        line: index + 1,
                        content: line.to_string(),
                    })?;

            let key = key.trim();
            if key.is_empty() {
                return Err(PropertiesParseError::EmptyKey { line: index + 1 });
            }

            entries.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { entries })
    }

    /// Render back to the payload format, one sorted `key=value` per line
    pub fn to_payload(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
