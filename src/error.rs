//! Error types for release sync operations.

use reqwest::StatusCode;
use std::io;
use thiserror::Error;

/// Low-level failures raised by a [`crate::http::Transport`].
///
/// These are the only failures the resilient client retries.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP client error (connection refused, timeout, broken body stream).
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// I/O error while preparing a request body.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The server answered with a 5xx status.
    #[error("server error {status} from {url}")]
    Server { status: StatusCode, url: String },

    /// Connection-level failure described by a message.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Errors that can occur while mirroring a release.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing credential or malformed repository identifier.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transient failure persisted through every retry attempt.
    #[error("request failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Non-retryable HTTP status returned by the API.
    #[error("HTTP {status} from {url}: {message}")]
    Api {
        status: StatusCode,
        url: String,
        message: String,
    },

    /// The requested release does not exist.
    #[error("release {what} not found in {repo}")]
    NotFound { repo: String, what: String },

    /// The destination already has a release with this tag.
    #[error("release {tag} already exists in {repo}. Use --force to overwrite.")]
    AlreadyExists { repo: String, tag: String },

    /// A forced overwrite could not remove the old release.
    #[error("failed to delete existing release {tag} from {repo}")]
    DeleteFailed { repo: String, tag: String },

    /// An asset could not be uploaded to the destination release.
    #[error("failed to upload {asset}")]
    UploadFailed {
        asset: String,
        #[source]
        source: Box<SyncError>,
    },

    /// An asset could not be downloaded into the staging directory.
    #[error("failed to download {asset}: {reason}")]
    TransferFailed { asset: String, reason: String },

    /// The source release cannot be mirrored as-is.
    #[error("invalid release: {0}")]
    InvalidRelease(String),

    /// I/O error during file operations.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Structured classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientNetwork,
    Api,
    NotFound,
    AlreadyExists,
    DeleteFailed,
    UploadFailed,
    TransferFailed,
    InvalidRelease,
    Io,
    Decode,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::RetriesExhausted { .. } => ErrorKind::TransientNetwork,
            SyncError::Api { .. } => ErrorKind::Api,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            SyncError::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            SyncError::UploadFailed { .. } => ErrorKind::UploadFailed,
            SyncError::TransferFailed { .. } => ErrorKind::TransferFailed,
            SyncError::InvalidRelease(_) => ErrorKind::InvalidRelease,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Json(_) => ErrorKind::Decode,
        }
    }

    /// True for an API answer of 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
            || matches!(self, SyncError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Terminal result of one sync: the destination release URL or the failure.
pub type SyncOutcome = Result<String, SyncError>;
