//! ---
//! vsl_section: "08-updater"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Updater state machine and its collaborators."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use vessel_common::{OperatingSystem, ServerEndpoints};

use crate::error::{Result, UpdaterError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Retrieves the distribution archive of the latest release.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Write the archive for `product` on `os` to `dest`.
    async fn fetch(&self, product: &str, os: OperatingSystem, dest: &Path) -> Result<PathBuf>;
}

/// Downloads from `GET /product/{id}/latest/{os}`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    endpoints: ServerEndpoints,
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(endpoints: ServerEndpoints) -> Result<Self> {
        Self::with_read_timeout(endpoints, READ_TIMEOUT)
    }

    /// Fetcher that gives up once the server sends nothing for
    /// `read_timeout`, whether before the headers or mid-body.
    pub fn with_read_timeout(endpoints: ServerEndpoints, read_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .user_agent(concat!("vessel-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| UpdaterError::network(endpoints.base(), err))?;
        Ok(Self { endpoints, http })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, product: &str, os: OperatingSystem, dest: &Path) -> Result<PathBuf> {
        let url = self.endpoints.latest_archive(product, os);
        debug!(%url, dest = %dest.display(), "downloading release archive");
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| UpdaterError::network(&url, err))?;
        if !response.status().is_success() {
            return Err(UpdaterError::network(
                &url,
                format!("server answered {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| UpdaterError::network(&url, format!("create {}: {err}", dest.display())))?;
        let mut written = 0_u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| UpdaterError::network(&url, err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| UpdaterError::network(&url, format!("write {}: {err}", dest.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|err| UpdaterError::network(&url, err))?;
        debug!(%url, bytes = written, "archive downloaded");
        Ok(dest.to_path_buf())
    }
}

/// Check that `path` is a readable zip archive. Returns the entry count.
pub fn validate_archive(path: &Path) -> Result<usize> {
    let file = File::open(path)
        .map_err(|err| UpdaterError::ArchiveCorrupt(format!("{}: {err}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| UpdaterError::ArchiveCorrupt(format!("{}: {err}", path.display())))?;
    if archive.len() == 0 {
        return Err(UpdaterError::ArchiveCorrupt(format!(
            "{} has no entries",
            path.display()
        )));
    }
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| UpdaterError::ArchiveCorrupt(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(UpdaterError::ArchiveCorrupt(format!(
                "entry {} escapes the archive root",
                entry.name()
            )));
        }
    }
    Ok(archive.len())
}
