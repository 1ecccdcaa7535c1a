//! RelSync - Mirror a GitHub release and its assets between repositories
//!
//! This library copies one release (metadata plus binary assets) from a
//! source repository to a destination repository, and attaches a
//! `checksums.txt` manifest so recipients can verify the assets.
//!
//! # Features
//!
//! - **Tag or Latest**: Mirror a specific tag or the latest release
//! - **Streaming Transfers**: Assets are streamed to disk and back out
//! - **SHA-256 Manifest**: `checksums.txt` uploaded alongside the assets
//! - **Automatic Retry**: Exponential backoff for transient failures
//! - **Rate-Limit Aware**: Waits for the API quota to reset instead of failing
//! - **Force Overwrite**: Replace an existing destination release
//!
//! # Example
//!
//! ```no_run
//! use relsync::{ReleaseSyncer, RepoSlug, SyncConfig, Token};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::new(
//!     RepoSlug::parse("acme/private")?,
//!     RepoSlug::parse("acme/public")?,
//!     Token::new("ghp_example")?,
//! );
//!
//! let url = ReleaseSyncer::new(&config)?.sync(None, false).await?;
//! println!("Mirrored to {}", url);
//! # Ok(())
//! # }
//! ```

mod checksum;
mod download;
mod error;
mod http;
mod orchestrator;
mod publish;
mod release;
mod types;

#[cfg(test)]
mod testing;

pub use checksum::{
    compute_file_sha256, digest_all, write_manifest, ChecksumManifest, MANIFEST_FILE_NAME,
};
pub use download::download_all;
pub use error::{ErrorKind, SyncError, SyncOutcome, TransportError};
pub use http::{
    ApiClient, ApiRequest, BodyStream, Clock, HttpResponse, ReqwestTransport, RequestBody,
    RetryPolicy, SystemClock, Transport,
};
pub use orchestrator::{ReleaseSyncer, StagingDir};
pub use publish::Publisher;
pub use release::{ExistingRelease, Presence, ReleaseReader};
pub use types::{
    AssetDescriptor, DryRunReport, PlannedAction, ReleaseDescriptor, RepoSlug, StagedAsset,
    SyncConfig, Token,
};
