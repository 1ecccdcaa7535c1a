//! Main orchestration logic for mirroring a release.

use crate::checksum::{digest_all, write_manifest, MANIFEST_FILE_NAME};
use crate::download::download_all;
use crate::error::{SyncError, SyncOutcome};
use crate::http::ApiClient;
use crate::publish::Publisher;
use crate::release::ReleaseReader;
use crate::types::{DryRunReport, PlannedAction, ReleaseDescriptor, RepoSlug, SyncConfig};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Staging directory that is removed when the guard is cleaned up or dropped.
///
/// Dropping covers early returns and cancelled futures (Ctrl-C), so partial
/// downloads do not pile up across interrupted runs.
pub struct StagingDir {
    path: PathBuf,
    scratch: Option<tempfile::TempDir>,
    removed: bool,
}

impl StagingDir {
    /// Creates the staging directory at `path`.
    ///
    /// An existing directory is never adopted: the run stages into a fresh
    /// `relsync-*` subdirectory and only that subdirectory is removed.
    pub fn create(path: &Path) -> Result<Self, SyncError> {
        if path.exists() {
            let scratch = tempfile::Builder::new()
                .prefix("relsync-")
                .tempdir_in(path)?;
            info!(
                "Staging directory {} already exists, staging into {}",
                path.display(),
                scratch.path().display()
            );
            return Ok(Self {
                path: scratch.path().to_path_buf(),
                scratch: Some(scratch),
                removed: false,
            });
        }

        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            scratch: None,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory. Never fails; problems are logged.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        let result = match self.scratch.take() {
            Some(scratch) => scratch.close(),
            None => std::fs::remove_dir_all(&self.path),
        };
        match result {
            Ok(()) => info!("🧹 Cleaned up temporary files"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "⚠️  Failed to remove staging directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Mirrors releases from a source repository to a destination repository.
///
/// # Example
///
/// ```no_run
/// use relsync::{ReleaseSyncer, RepoSlug, SyncConfig, Token};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SyncConfig::new(
///     RepoSlug::parse("acme/private")?,
///     RepoSlug::parse("acme/public")?,
///     Token::new(std::env::var("GITHUB_TOKEN")?)?,
/// );
/// let url = ReleaseSyncer::new(&config)?.sync(Some("v1.0.0"), false).await?;
/// println!("{}", url);
/// # Ok(())
/// # }
/// ```
pub struct ReleaseSyncer {
    client: ApiClient,
    reader: ReleaseReader,
    publisher: Publisher,
    source: RepoSlug,
    staging_dir: PathBuf,
}

impl ReleaseSyncer {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self::with_client(ApiClient::from_config(config)?, config))
    }

    pub fn with_client(client: ApiClient, config: &SyncConfig) -> Self {
        info!(
            "Initialized release syncer: {} -> {}",
            config.source, config.destination
        );
        Self {
            reader: ReleaseReader::new(client.clone()),
            publisher: Publisher::new(client.clone(), config.destination.clone()),
            client,
            source: config.source.clone(),
            staging_dir: config.staging_dir.clone(),
        }
    }

    /// Mirrors the release for `tag` (or the latest release) and returns the
    /// destination release URL.
    ///
    /// The steps run in order:
    ///
    /// 1. Fetch the source release
    /// 2. Download its assets into the staging directory
    /// 3. Write `checksums.txt` (only when there are assets)
    /// 4. Create the destination release and upload assets plus manifest
    ///
    /// Whatever staging directory the run created is removed before this
    /// returns, on success and on failure.
    pub async fn sync(&self, tag: Option<&str>, force: bool) -> SyncOutcome {
        info!(
            "🔄 Starting release sync: {} -> {}",
            self.source,
            self.publisher.destination()
        );

        match self.run(tag, force).await {
            Ok(url) => {
                info!("✅ Successfully synced release: {}", url);
                Ok(url)
            }
            Err(e) => {
                error!("❌ Sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, tag: Option<&str>, force: bool) -> SyncOutcome {
        let release = self.reader.fetch(&self.source, tag).await?;

        let staging = StagingDir::create(&self.staging_dir)?;
        let outcome = self.stage_and_publish(&release, staging.path(), force).await;
        staging.cleanup();
        outcome
    }

    async fn stage_and_publish(
        &self,
        release: &ReleaseDescriptor,
        dir: &Path,
        force: bool,
    ) -> SyncOutcome {
        let staged = download_all(&self.client, release, dir).await?;

        let mut files: Vec<PathBuf> = staged
            .iter()
            .filter(|s| {
                let is_manifest = s.asset.name == MANIFEST_FILE_NAME;
                if is_manifest {
                    warn!(
                        "Source asset {} is replaced by the generated manifest",
                        MANIFEST_FILE_NAME
                    );
                }
                !is_manifest
            })
            .map(|s| s.path.clone())
            .collect();

        if !files.is_empty() {
            let manifest = digest_all(&files).await?;
            files.push(write_manifest(&manifest, dir).await?);
        }

        self.publisher.publish(release, &files, force).await
    }

    /// Dry run: reads the source release and probes the destination without
    /// changing anything.
    pub async fn plan(&self, tag: Option<&str>, force: bool) -> Result<DryRunReport, SyncError> {
        let release = self.reader.fetch(&self.source, tag).await?;
        let exists = self.publisher.release_exists(&release.tag_name).await?;
        let action = match (exists, force) {
            (false, _) => PlannedAction::Create,
            (true, true) => PlannedAction::Overwrite,
            (true, false) => PlannedAction::Conflict,
        };

        info!("🔍 Dry run - would sync:");
        info!("   Tag: {}", release.tag_name);
        info!("   Name: {}", release.display_name());
        info!("   Assets: {}", release.assets.len());
        info!("   Prerelease: {}", release.prerelease);
        match action {
            PlannedAction::Create => info!("   Action: Would create new release"),
            PlannedAction::Overwrite => {
                info!("   Action: Would overwrite existing release (--force enabled)")
            }
            PlannedAction::Conflict => {
                info!("   Action: Would fail - release exists (use --force to overwrite)")
            }
        }

        Ok(DryRunReport {
            tag: release.tag_name.clone(),
            name: release.display_name().to_string(),
            asset_count: release.assets.len(),
            prerelease: release.prerelease,
            action,
        })
    }
}
