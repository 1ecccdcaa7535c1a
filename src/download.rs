//! Asset download into the staging directory.

use crate::error::SyncError;
use crate::http::ApiClient;
use crate::types::{AssetDescriptor, ReleaseDescriptor, StagedAsset};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// Assets above this size get a byte progress bar.
const PROGRESS_THRESHOLD: u64 = 1024 * 1024;

/// Rejects asset names that cannot be used as plain local file names.
pub(crate) fn validate_assets(assets: &[AssetDescriptor]) -> Result<(), SyncError> {
    let mut seen = HashSet::new();
    for asset in assets {
        let name = asset.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(SyncError::InvalidRelease(format!(
                "asset name '{}' is not a plain file name",
                name
            )));
        }
        if !seen.insert(name) {
            return Err(SyncError::InvalidRelease(format!(
                "asset name '{}' appears more than once",
                name
            )));
        }
    }
    Ok(())
}

fn progress_bar(asset: &AssetDescriptor) -> indicatif::ProgressBar {
    if asset.size <= PROGRESS_THRESHOLD || !atty::is(atty::Stream::Stderr) {
        return indicatif::ProgressBar::hidden();
    }
    let pb = indicatif::ProgressBar::new(asset.size);
    if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
    ) {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb.set_message(asset.name.clone());
    pb
}

/// Streams one asset to `dir/<asset.name>`.
async fn download_asset(
    client: &ApiClient,
    asset: &AssetDescriptor,
    dir: &Path,
) -> Result<StagedAsset, SyncError> {
    let path = dir.join(&asset.name);
    let response = client.execute(&client.download_request(&asset.url)).await?;

    let mut file = BufWriter::new(tokio::fs::File::create(&path).await?);
    let mut byte_stream = response.into_body();
    let pb = progress_bar(asset);
    let mut bytes_written = 0u64;

    while let Some(piece) = byte_stream.next().await {
        let chunk = piece.map_err(|e| SyncError::TransferFailed {
            asset: asset.name.clone(),
            reason: e.to_string(),
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
        pb.set_position(bytes_written);
    }
    file.flush().await?;
    pb.finish_and_clear();

    if bytes_written != asset.size {
        return Err(SyncError::TransferFailed {
            asset: asset.name.clone(),
            reason: format!(
                "size mismatch: expected {} bytes, got {} bytes",
                asset.size, bytes_written
            ),
        });
    }
    if bytes_written == 0 {
        warn!("Asset {} is empty", asset.name);
    }

    Ok(StagedAsset {
        path,
        asset: asset.clone(),
        bytes_written,
    })
}

/// Downloads every asset of `release` into `dir`, in release order.
///
/// `dir` is created if needed. Each downloaded file has exactly the
/// declared asset size or the call fails.
pub async fn download_all(
    client: &ApiClient,
    release: &ReleaseDescriptor,
    dir: &Path,
) -> Result<Vec<StagedAsset>, SyncError> {
    tokio::fs::create_dir_all(dir).await?;
    validate_assets(&release.assets)?;

    if release.assets.is_empty() {
        info!("No assets to download");
        return Ok(Vec::new());
    }

    let total = release.assets.len();
    let mut staged = Vec::with_capacity(total);
    for (i, asset) in release.assets.iter().enumerate() {
        info!(
            "Downloading asset {}/{}: {} ({} bytes)",
            i + 1,
            total,
            asset.name,
            asset.size
        );
        staged.push(download_asset(client, asset, dir).await?);
        info!("✅ Downloaded: {}", asset.name);
    }

    Ok(staged)
}
