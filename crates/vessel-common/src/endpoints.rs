//! ---
//! vsl_section: "05-http-interfaces"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Shared primitives and utilities for Vessel services."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::platform::OperatingSystem;

/// Raised for server base URLs that cannot carry a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid server url '{0}': expected an absolute http(s) url")]
pub struct InvalidServerUrl(pub String);

/// Client-side view of the release server routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Url", into = "Url")]
pub struct ServerEndpoints {
    base: Url,
}

impl ServerEndpoints {
    /// Wrap a base URL; a trailing slash is implied.
    pub fn new(base: Url) -> Result<Self, InvalidServerUrl> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(InvalidServerUrl(base.to_string()));
        }
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    /// Parse and wrap a base URL.
    pub fn parse(raw: &str) -> Result<Self, InvalidServerUrl> {
        let url = Url::parse(raw.trim()).map_err(|_| InvalidServerUrl(raw.to_owned()))?;
        Self::new(url)
    }

    /// Base URL, always ending in `/`.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `GET product/{identifier}/latest/version`
    #[must_use]
    pub fn latest_version(&self, product: &str) -> Url {
        self.with_segments(&["product", product, "latest", "version"])
    }

    /// `GET product/{identifier}/latest/{os}`
    #[must_use]
    pub fn latest_archive(&self, product: &str, os: OperatingSystem) -> Url {
        self.with_segments(&["product", product, "latest", os.as_str()])
    }

    /// `GET updater?os={os}`
    #[must_use]
    pub fn updater(&self, os: Option<OperatingSystem>) -> Url {
        let mut url = self.with_segments(&["updater"]);
        if let Some(os) = os {
            url.query_pairs_mut().append_pair("os", os.as_str());
        }
        url
    }

    fn with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl TryFrom<Url> for ServerEndpoints {
    type Error = InvalidServerUrl;

    fn try_from(value: Url) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerEndpoints> for Url {
    fn from(value: ServerEndpoints) -> Self {
        value.base
    }
}

impl std::fmt::Display for ServerEndpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base.as_str())
    }
}
