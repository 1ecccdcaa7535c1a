//! Data structures for release sync operations.

use crate::error::SyncError;
use crate::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Release metadata as read from the source repository.
///
/// Field names follow the GitHub REST schema so the same struct is used to
/// decode the source release and to build the destination create payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReleaseDescriptor {
    /// Git tag the release points at.
    pub tag_name: String,
    /// Display name (GitHub allows `null`).
    #[serde(default)]
    pub name: Option<String>,
    /// Release notes (GitHub allows `null`).
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    /// Binary assets in release order.
    #[serde(default, skip_serializing)]
    pub assets: Vec<AssetDescriptor>,
}

impl ReleaseDescriptor {
    /// Name for log lines, falling back to the tag.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tag_name)
    }
}

/// One binary asset attached to a release.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// Remote asset name, also used as the local file name.
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// API URL the asset is downloaded from.
    pub url: String,
}

/// An asset written to the staging directory.
#[derive(Debug, Clone)]
pub struct StagedAsset {
    pub path: PathBuf,
    pub asset: AssetDescriptor,
    pub bytes_written: u64,
}

/// Repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let invalid = || {
            SyncError::Configuration(format!(
                "invalid repository format '{}'. Use 'owner/repo' format.",
                value
            ))
        };
        let (owner, name) = value.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// API token. `Debug` never prints the secret.
#[derive(Clone)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Result<Self, SyncError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(SyncError::Configuration(
                "GitHub token required (--token or GITHUB_TOKEN env var)".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Configuration for one release sync.
///
/// # Example
///
/// ```
/// use relsync::{RepoSlug, SyncConfig, Token};
///
/// let config = SyncConfig::new(
///     RepoSlug::parse("acme/private").unwrap(),
///     RepoSlug::parse("acme/public").unwrap(),
///     Token::new("ghp_example").unwrap(),
/// );
/// assert_eq!(config.api_base_url, "https://api.github.com");
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Repository the release is read from.
    pub source: RepoSlug,
    /// Repository the release is mirrored to.
    pub destination: RepoSlug,
    pub token: Token,
    /// Base URL of the REST API (e.g., `https://api.github.com`).
    pub api_base_url: String,
    /// Temporary directory for downloaded assets (e.g., `"temp_assets"`).
    ///
    /// The directory is removed when the sync ends, whatever the outcome.
    pub staging_dir: PathBuf,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl SyncConfig {
    pub fn new(source: RepoSlug, destination: RepoSlug, token: Token) -> Self {
        Self {
            source,
            destination,
            token,
            api_base_url: "https://api.github.com".to_string(),
            staging_dir: PathBuf::from("temp_assets"),
            retry: RetryPolicy::default(),
            user_agent: format!("relsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// What a real sync would do with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    /// No release with the tag exists yet.
    Create,
    /// A release exists and `force` is set.
    Overwrite,
    /// A release exists and `force` is not set; the sync would fail.
    Conflict,
}

/// Result of a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunReport {
    pub tag: String,
    pub name: String,
    pub asset_count: usize,
    pub prerelease: bool,
    pub action: PlannedAction,
}
