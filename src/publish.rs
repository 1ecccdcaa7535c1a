//! Creating the mirrored release in the destination repository.

use crate::error::SyncError;
use crate::http::{ApiClient, RequestBody};
use crate::release::{Presence, ReleaseReader};
use crate::types::{ReleaseDescriptor, RepoSlug};
use reqwest::Method;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Fields of a freshly created release needed to finish publishing.
#[derive(Deserialize, Debug, Clone)]
struct CreatedRelease {
    html_url: String,
    upload_url: String,
}

/// Strips the RFC 6570 template suffix (`{?name,label}`) from an upload URL.
fn upload_target(upload_url: &str) -> &str {
    match upload_url.find('{') {
        Some(idx) => &upload_url[..idx],
        None => upload_url,
    }
}

/// Publishes releases to one destination repository.
#[derive(Clone)]
pub struct Publisher {
    client: ApiClient,
    reader: ReleaseReader,
    destination: RepoSlug,
}

impl Publisher {
    pub fn new(client: ApiClient, destination: RepoSlug) -> Self {
        Self {
            reader: ReleaseReader::new(client.clone()),
            client,
            destination,
        }
    }

    pub fn destination(&self) -> &RepoSlug {
        &self.destination
    }

    pub async fn release_exists(&self, tag: &str) -> Result<bool, SyncError> {
        self.reader.exists_at(&self.destination, tag).await
    }

    /// Deletes the destination release for `tag`.
    ///
    /// Returns `false` instead of failing when the lookup or the delete does
    /// not succeed.
    pub async fn delete_existing(&self, tag: &str) -> bool {
        match self.try_delete(tag).await {
            Ok(()) => {
                info!("Deleted existing release {} from {}", tag, self.destination);
                true
            }
            Err(e) => {
                error!("Failed to delete existing release: {}", e);
                false
            }
        }
    }

    async fn try_delete(&self, tag: &str) -> Result<(), SyncError> {
        let existing = match self.reader.lookup(&self.destination, tag).await? {
            Presence::Found(existing) => existing,
            Presence::Absent => {
                return Err(SyncError::NotFound {
                    repo: self.destination.to_string(),
                    what: tag.to_string(),
                })
            }
        };
        let id = existing.id.to_string();
        let url = self
            .client
            .repo_url(&self.destination, &["releases", id.as_str()])?;
        self.client
            .execute(&self.client.json_request(Method::DELETE, &url))
            .await?;
        Ok(())
    }

    /// Creates `release` in the destination and uploads `files` to it in order.
    ///
    /// An existing release with the same tag fails the call unless `force`
    /// is set, in which case it is deleted first. A failed upload aborts the
    /// remaining ones; assets already uploaded stay on the new release.
    pub async fn publish(
        &self,
        release: &ReleaseDescriptor,
        files: &[PathBuf],
        force: bool,
    ) -> Result<String, SyncError> {
        let tag = &release.tag_name;

        if self.release_exists(tag).await? {
            if !force {
                return Err(SyncError::AlreadyExists {
                    repo: self.destination.to_string(),
                    tag: tag.clone(),
                });
            }
            info!("Force flag enabled, deleting existing release...");
            if !self.delete_existing(tag).await {
                return Err(SyncError::DeleteFailed {
                    repo: self.destination.to_string(),
                    tag: tag.clone(),
                });
            }
        }

        info!("Creating release {} in {}...", tag, self.destination);
        let url = self.client.repo_url(&self.destination, &["releases"])?;
        let mut request = self.client.json_request(Method::POST, &url);
        request.body = RequestBody::Json(serde_json::to_value(release)?);
        let created: CreatedRelease = self.client.execute_json(&request).await?;
        info!("✅ Created release: {}", created.html_url);

        let target = upload_target(&created.upload_url);
        for (i, file) in files.iter().enumerate() {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    SyncError::InvalidRelease(format!("{} has no file name", file.display()))
                })?
                .to_string();
            info!("Uploading asset {}/{}: {}", i + 1, files.len(), name);
            self.upload_asset(target, &name, file)
                .await
                .map_err(|e| SyncError::UploadFailed {
                    asset: name.clone(),
                    source: Box::new(e),
                })?;
            info!("📤 Uploaded: {}", name);
        }

        Ok(created.html_url)
    }

    async fn upload_asset(&self, target: &str, name: &str, path: &Path) -> Result<(), SyncError> {
        let len = tokio::fs::metadata(path).await?.len();
        if len > 1024 * 1024 {
            info!("Uploading large file: {} ({} bytes)", name, len);
        }
        let request = self
            .client
            .upload_request(target, name, path.to_path_buf(), len);
        self.client.execute(&request).await?;
        Ok(())
    }
}
