//! SHA-256 checksums for staged assets and the manifest file.

use crate::error::SyncError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the generated manifest.
pub const MANIFEST_FILE_NAME: &str = "checksums.txt";

const BLOCK_SIZE: usize = 1024 * 1024;

/// Asset file name to lowercase hex SHA-256, ordered by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, String>,
}

impl ChecksumManifest {
    pub fn insert(&mut self, file_name: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(file_name.into(), digest.into());
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `<digest>  <file name>` lines, each newline-terminated.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(name, digest)| format!("{}  {}\n", digest, name))
            .collect()
    }
}

/// Computes the SHA-256 hash of a local file.
///
/// The file is read in fixed-size blocks on a blocking thread so large
/// assets never sit in memory.
pub async fn compute_file_sha256(path: &Path) -> Result<String, SyncError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<String, SyncError> {
        use sha2::{Digest, Sha256};
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BLOCK_SIZE];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(format!("Task join error: {}", e))))?
}

/// Digests every regular file in `files`.
///
/// Missing paths and non-regular entries are skipped, as is any file named
/// like the manifest. Any other I/O error fails the whole digest.
pub async fn digest_all(files: &[PathBuf]) -> Result<ChecksumManifest, SyncError> {
    let mut manifest = ChecksumManifest::default();

    for path in files {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == MANIFEST_FILE_NAME {
            continue;
        }

        info!("Generating checksum for {}", file_name);
        let digest = compute_file_sha256(path).await?;
        manifest.insert(file_name, digest);
    }

    Ok(manifest)
}

/// Writes `manifest` to `dir/checksums.txt` and returns the path.
pub async fn write_manifest(manifest: &ChecksumManifest, dir: &Path) -> Result<PathBuf, SyncError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    tokio::fs::write(&path, manifest.render()).await?;
    info!("Created checksums file with {} entries", manifest.len());
    Ok(path)
}
