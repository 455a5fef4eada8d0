use std::io;
use std::path::PathBuf;

use ociclient::{AuthError, BlobError, ClientError, ResolveError};
use thiserror::Error;

/// Failure to store one blob. The pull carries on with the next layer.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Layer digest is empty")]
    EmptyDigest,

    #[error("Layer digest {digest} is not valid: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error("Layer {digest} has no legacy id")]
    MissingLegacyId { digest: String },

    #[error("Failed to download blob {digest}: {source}")]
    BlobFetchFailed {
        digest: String,
        #[source]
        source: BlobError,
    },

    #[error("Failed to gunzip blob {digest}: {source}")]
    DecompressionFailed {
        digest: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DiffIdError {
    #[error("Failed to open file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to find layer ids")]
    MissingDiffIds,

    #[error("Invalid diff id {diff_id}: {reason}")]
    InvalidDiffId { diff_id: String, reason: String },
}

/// Errors that abort a pull
#[derive(Debug, Error)]
pub enum PullError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Get docker authentication endpoint: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to get manifest: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Only output directory supported: {0} is not a directory")]
    OutputNotDirectory(PathBuf),

    #[error("Failed to create folder {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to download config: {0}")]
    ConfigBlob(#[source] MaterializeError),

    #[error("Failed to get layer ids: {0}")]
    DiffIds(#[from] DiffIdError),

    #[error("Image config lists {found} diff ids but the manifest has {expected} layers")]
    LayerCountMismatch { expected: usize, found: usize },

    #[error("Failed to write {path}: {source}")]
    WriteManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PullError>;
