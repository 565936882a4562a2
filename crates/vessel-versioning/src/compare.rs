//! ---
//! vsl_section: "01-versioning"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Version ordering and build metadata helpers."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while parsing a dotted version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// A segment was empty, signed, non-numeric or out of range.
    #[error("malformed version '{input}': {reason}")]
    Malformed {
        /// The rejected input as supplied by the caller.
        input: String,
        /// Short description of the offending segment.
        reason: String,
    },
}

impl VersionError {
    fn malformed(input: &str, reason: impl Into<String>) -> Self {
        VersionError::Malformed {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A parsed dotted-integer version such as `1.2.0`.
///
/// Ordering and equality follow the release comparator: trailing zero
/// segments are insignificant (`1.2.0 == 1.2`), interior zeros are kept
/// (`1.0.0.1 > 1.0.0`), and a strict prefix sorts first.
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<u64>,
    significant: usize,
}

impl Version {
    /// Parse a version string. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::malformed(input, "empty version"));
        }

        let mut segments = Vec::new();
        for (index, raw) in trimmed.split('.').enumerate() {
            if raw.is_empty() {
                return Err(VersionError::malformed(
                    input,
                    format!("segment {index} is empty"),
                ));
            }
            if !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::malformed(
                    input,
                    format!("segment {index} ('{raw}') is not a non-negative integer"),
                ));
            }
            let value = raw.parse::<u64>().map_err(|_| {
                VersionError::malformed(input, format!("segment {index} ('{raw}') is out of range"))
            })?;
            segments.push(value);
        }

        let significant = segments
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |pos| pos + 1);

        Ok(Self {
            segments,
            significant,
        })
    }

    /// All segments as registered, including trailing zeros.
    #[must_use]
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Segments that participate in ordering (trailing zeros stripped).
    #[must_use]
    pub fn normalized(&self) -> &[u64] {
        &self.segments[..self.significant]
    }

    /// Registered form with leading zeros removed, e.g. `01.2.0` -> `1.2.0`.
    #[must_use]
    pub fn canonical(&self) -> String {
        join(&self.segments)
    }

    /// Key shared by every spelling of the same version (`1.2`, `1.2.0`).
    ///
    /// An all-zero version maps to `"0"`.
    #[must_use]
    pub fn normalized_key(&self) -> String {
        if self.significant == 0 {
            return "0".to_owned();
        }
        join(self.normalized())
    }
}

fn join(segments: &[u64]) -> String {
    segments
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(other.normalized())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Compare two version strings.
///
/// `Ordering::Less`, `Equal` and `Greater` correspond to -1, 0 and 1.
pub fn compare(left: &str, right: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(left)?.cmp(&Version::parse(right)?))
}

/// Returns `true` when `candidate` is strictly greater than `current`.
pub fn is_newer(candidate: &str, current: &str) -> Result<bool, VersionError> {
    Ok(compare(candidate, current)? == Ordering::Greater)
}
