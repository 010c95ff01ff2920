//! Version identifiers and latest-version selection
//!
//! Archetype metadata is published per version. Identifiers are dotted
//! numbers with an optional qualifier (`2.0.0`, `2.0.0-M1`, `1.4.10-SNAPSHOT`)
//! and are ordered the way Maven orders artifact versions:
//!
//! ```text
//! alpha < beta < milestone < rc < snapshot < (release) < sp < other
//! ```
//!
//! Numeric tokens ignore leading zeros and missing trailing tokens count as
//! zero/release, so `1.0.0`, `1.0`, `01` and `1-ga` are all the same version.
//! The same holds in front of a qualifier: `2.0.0-M1` equals `2-M1`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while parsing or selecting versions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version format '{input}': {reason}")]
    InvalidVersionFormat { input: String, reason: String },

    #[error("Cannot select the latest version of an empty candidate set")]
    EmptyCandidateSet,
}

/// Qualifier ranks, lowest first
const RANK_ALPHA: u8 = 0;
const RANK_BETA: u8 = 1;
const RANK_MILESTONE: u8 = 2;
const RANK_RC: u8 = 3;
const RANK_SNAPSHOT: u8 = 4;
const RANK_RELEASE: u8 = 5;
const RANK_SP: u8 = 6;
const RANK_OTHER: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Item {
    /// Decimal digits without leading zeros (`"0"` for zero)
    Number(String),
    Qualifier { rank: u8, name: String },
}

impl Item {
    fn from_token(token: &str) -> Self {
        if token.bytes().all(|b| b.is_ascii_digit()) {
            let digits = token.trim_start_matches('0');
            let digits = if digits.is_empty() { "0" } else { digits };
            return Item::Number(digits.to_string());
        }

        let lower = token.to_ascii_lowercase();
        let (rank, name) = match lower.as_str() {
            "alpha" | "a" => (RANK_ALPHA, "alpha"),
            "beta" | "b" => (RANK_BETA, "beta"),
            "milestone" | "m" => (RANK_MILESTONE, "milestone"),
            "rc" | "cr" => (RANK_RC, "rc"),
            "snapshot" => (RANK_SNAPSHOT, "snapshot"),
            "ga" | "final" | "release" => (RANK_RELEASE, "ga"),
            "sp" => (RANK_SP, "sp"),
            _ => (RANK_OTHER, lower.as_str()),
        };
        Item::Qualifier {
            rank,
            name: name.to_string(),
        }
    }

    /// Whether this item is indistinguishable from a missing trailing token
    fn is_null(&self) -> bool {
        match self {
            Item::Number(digits) => digits == "0",
            Item::Qualifier { rank, .. } => *rank == RANK_RELEASE,
        }
    }

    fn compare(&self, other: &Item) -> Ordering {
        match (self, other) {
            (Item::Number(a), Item::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Item::Number(_), Item::Qualifier { .. }) => Ordering::Greater,
            (Item::Qualifier { .. }, Item::Number(_)) => Ordering::Less,
            (
                Item::Qualifier { rank: ra, name: na },
                Item::Qualifier { rank: rb, name: nb },
            ) => ra.cmp(rb).then_with(|| {
                if *ra == RANK_OTHER {
                    na.cmp(nb)
                } else {
                    Ordering::Equal
                }
            }),
        }
    }

    fn compare_to_null(&self) -> Ordering {
        match self {
            Item::Number(digits) if digits == "0" => Ordering::Equal,
            Item::Number(_) => Ordering::Greater,
            Item::Qualifier { rank, .. } => rank.cmp(&RANK_RELEASE),
        }
    }
}

/// A parsed, totally ordered version identifier
///
/// Equality and ordering are semantic; [`fmt::Display`] reproduces the text
/// the version was parsed from.
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    items: Vec<Item>,
}

impl Version {
    /// Parse a version identifier
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersionFormat {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let text = input.trim();
        if text.is_empty() {
            return Err(invalid("version is empty"));
        }

        // A '-' or a digit/letter transition opens a new segment
        let mut segments: Vec<Vec<String>> = vec![Vec::new()];
        let mut current = String::new();

        for c in text.chars() {
            if c == '.' || c == '-' {
                if current.is_empty() {
                    return Err(invalid("empty token"));
                }
                push_token(&mut segments, std::mem::take(&mut current));
                if c == '-' {
                    segments.push(Vec::new());
                }
            } else if c.is_ascii_alphanumeric() {
                let digit_run = current.chars().last().map(|last| last.is_ascii_digit());
                if digit_run.is_some_and(|was_digit| was_digit != c.is_ascii_digit()) {
                    push_token(&mut segments, std::mem::take(&mut current));
                    segments.push(Vec::new());
                }
                current.push(c);
            } else {
                return Err(invalid(&format!("unexpected character '{c}'")));
            }
        }

        if current.is_empty() {
            return Err(invalid("empty token"));
        }
        push_token(&mut segments, current);

        let segments: Vec<Vec<Item>> = segments
            .iter()
            .map(|segment| segment.iter().map(|t| Item::from_token(t)).collect())
            .collect();
        if !matches!(segments[0].first(), Some(Item::Number(_))) {
            return Err(invalid("must start with a number"));
        }

        // Null items are insignificant at the end of every segment, so
        // `1.0-RC1` and `1-RC1` are the same version. The leading number stays.
        let mut items = Vec::new();
        for (index, mut segment) in segments.into_iter().enumerate() {
            let keep = usize::from(index == 0);
            while segment.len() > keep && segment.last().is_some_and(Item::is_null) {
                segment.pop();
            }
            items.extend(segment);
        }

        Ok(Self {
            text: text.to_string(),
            items,
        })
    }

    /// The text this version was parsed from
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Canonical key: equal versions have equal keys
    ///
    /// Used as the cache directory name and as the refresh dedup key.
    pub fn key(&self) -> String {
        let mut key = String::new();
        for (i, item) in self.items.iter().enumerate() {
            match item {
                Item::Number(digits) => {
                    if i > 0 {
                        key.push('.');
                    }
                    key.push_str(digits);
                }
                Item::Qualifier { name, .. } => {
                    key.push('-');
                    key.push_str(name);
                }
            }
        }
        key
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.items.len().max(other.items.len());
        for i in 0..len {
            let ordering = match (self.items.get(i), other.items.get(i)) {
                (Some(a), Some(b)) => a.compare(b),
                (Some(a), None) => a.compare_to_null(),
                (None, Some(b)) => b.compare_to_null().reverse(),
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.items.hash(state);
    }
}

fn push_token(segments: &mut [Vec<String>], token: String) {
    if let Some(segment) = segments.last_mut() {
        segment.push(token);
    }
}

/// Compare two version identifiers
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    let a = Version::parse(a)?;
    let b = Version::parse(b)?;
    Ok(a.cmp(&b))
}

/// Select the greatest version
///
/// Ties between textually different but equal versions resolve to the
/// candidate seen first.
pub fn latest<I>(candidates: I) -> Result<Version, VersionError>
where
    I: IntoIterator<Item = Version>,
{
    let mut candidates = candidates.into_iter();
    let mut best = candidates.next().ok_or(VersionError::EmptyCandidateSet)?;
    for candidate in candidates {
        if candidate > best {
            best = candidate;
        }
    }
    Ok(best)
}
