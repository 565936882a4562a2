//! ---
//! vsl_section: "01-versioning"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Version ordering and build metadata helpers."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use serde::Serialize;

/// Compile-time version metadata for the running binary.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Workspace package version.
    pub semver: String,
    /// Operating system the binary was compiled for.
    pub target_os: String,
    /// Target architecture.
    pub target_arch: String,
    /// `debug` or `release`.
    pub profile: String,
}

impl VersionInfo {
    /// Construct a new [`VersionInfo`] for the calling crate.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            target_os: std::env::consts::OS.to_owned(),
            target_arch: std::env::consts::ARCH.to_owned(),
            profile: if cfg!(debug_assertions) {
                "debug".to_owned()
            } else {
                "release".to_owned()
            },
        }
    }

    /// Concise string for log lines.
    #[must_use]
    pub fn cli_string(&self) -> String {
        format!("{} ({}-{})", self.semver, self.target_os, self.target_arch)
    }

    /// Human readable banner used in logging surfaces.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("Vessel v{}", self.semver)
    }

    /// Extended string suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nTarget: {os}-{arch}\nProfile: {profile}",
            banner = self.banner(),
            os = self.target_os,
            arch = self.target_arch,
            profile = self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        let extended = info.extended();
        assert!(extended.contains(&info.semver));
        assert!(extended.contains(&info.target_os));
    }
}
