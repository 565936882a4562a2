//! ---
//! vsl_section: "04-configuration"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Shared primitives and utilities for Vessel services."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Platforms a release can ship artifacts for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperatingSystem {
    Darwin,
    Windows,
    Linux,
}

/// Raised for any platform name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported operating system '{0}' (expected darwin, windows or linux)")]
pub struct UnsupportedPlatform(pub String);

impl OperatingSystem {
    /// Parse a platform name, rejecting anything outside the supported set.
    pub fn parse(name: &str) -> Result<Self, UnsupportedPlatform> {
        name.trim()
            .parse::<OperatingSystem>()
            .map_err(|_| UnsupportedPlatform(name.to_owned()))
    }

    /// Platform of the running process, if it is one we ship for.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::from_rust_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value onto the supported set.
    #[must_use]
    pub fn from_rust_os(os: &str) -> Option<Self> {
        match os {
            "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    /// Lowercase wire name, as stored in the catalog and used in URLs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn parses_supported_names() {
        assert_eq!(OperatingSystem::parse("darwin").unwrap(), OperatingSystem::Darwin);
        assert_eq!(OperatingSystem::parse("Linux").unwrap(), OperatingSystem::Linux);
        assert_eq!(OperatingSystem::Windows.to_string(), "windows");
    }

    #[test]
    fn rejects_other_platforms() {
        let err = OperatingSystem::parse("win32").unwrap_err();
        assert_eq!(err.0, "win32");
        assert!(OperatingSystem::parse("freebsd").is_err());
    }

    #[test]
    fn wire_names_round_trip() {
        for os in OperatingSystem::iter() {
            assert_eq!(OperatingSystem::parse(os.as_str()).unwrap(), os);
        }
        assert_eq!(OperatingSystem::from_rust_os("macos"), Some(OperatingSystem::Darwin));
        assert_eq!(OperatingSystem::from_rust_os("freebsd"), None);
    }
}
