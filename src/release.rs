//! Release metadata fetching and existence probes.

use crate::error::SyncError;
use crate::http::ApiClient;
use crate::types::{ReleaseDescriptor, RepoSlug};
use serde::Deserialize;
use tracing::info;

/// Identity of a release that already exists in a repository.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExistingRelease {
    pub id: u64,
    #[serde(default)]
    pub html_url: String,
}

/// Result of probing a repository for a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Found(ExistingRelease),
    Absent,
}

/// Reads releases from any repository through the shared client.
#[derive(Clone)]
pub struct ReleaseReader {
    client: ApiClient,
}

impl ReleaseReader {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetches the release for `tag`, or the latest release when `tag` is `None`.
    pub async fn fetch(
        &self,
        repo: &RepoSlug,
        tag: Option<&str>,
    ) -> Result<ReleaseDescriptor, SyncError> {
        let url = match tag {
            Some(tag) => {
                info!("Fetching release info for tag: {}", tag);
                self.client.repo_url(repo, &["releases", "tags", tag])?
            }
            None => {
                info!("Fetching latest release info");
                self.client.repo_url(repo, &["releases", "latest"])?
            }
        };

        let release: ReleaseDescriptor = self.client.get_json(&url).await.map_err(|e| {
            if e.is_not_found() {
                SyncError::NotFound {
                    repo: repo.to_string(),
                    what: tag.unwrap_or("latest").to_string(),
                }
            } else {
                e
            }
        })?;

        info!(
            "Found release: {} ({})",
            release.display_name(),
            release.tag_name
        );
        info!("Assets: {} files", release.assets.len());
        Ok(release)
    }

    /// Looks up the release for `tag` without treating absence as an error.
    ///
    /// Only a 404 maps to [`Presence::Absent`]; transport and auth failures
    /// still propagate.
    pub async fn lookup(&self, repo: &RepoSlug, tag: &str) -> Result<Presence, SyncError> {
        let url = self.client.repo_url(repo, &["releases", "tags", tag])?;
        match self.client.get_json::<ExistingRelease>(&url).await {
            Ok(existing) => Ok(Presence::Found(existing)),
            Err(e) if e.is_not_found() => Ok(Presence::Absent),
            Err(e) => Err(e),
        }
    }

    pub async fn exists_at(&self, repo: &RepoSlug, tag: &str) -> Result<bool, SyncError> {
        let exists = matches!(self.lookup(repo, tag).await?, Presence::Found(_));
        if exists {
            info!("Release {} already exists in {}", tag, repo);
        } else {
            info!("Release {} does not exist in {}", tag, repo);
        }
        Ok(exists)
    }
}
