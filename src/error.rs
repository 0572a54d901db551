//! Error types for the Keep client

use std::path::PathBuf;
use thiserror::Error;

/// Keep client error
#[derive(Debug, Error)]
pub enum KeepError {
    /// Locator string does not follow `<md5>+<size>[+hint]*`
    #[error("Malformed locator: {0}")]
    MalformedLocator(String),

    /// Manifest text could not be decoded
    #[error("{0}")]
    InvalidManifest(String),

    /// The accessible-services listing came back empty
    #[error("No gateway services available!")]
    NoGatewayServices,

    /// The accessible-services listing could not be fetched
    #[error("Cannot obtain list of accessible keep services: {0}")]
    ServiceListUnavailable(String),

    /// Every ranked endpoint failed to serve a block
    #[error("No server responding. Unable to download data chunk.")]
    NoAvailableReplica,

    /// Every replica branch of a write failed
    #[error("Unable to store block {locator}: no replica accepted the write")]
    PutFailed { locator: String },

    /// Block bytes do not hash to the locator they were fetched by
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// A stream ran out of blocks while a file still owed bytes
    #[error("Data chunk required for download is missing.")]
    MissingChunk,

    /// Download target file exists
    #[error("File {} already exists", path.display())]
    FileAlreadyExists { path: PathBuf },

    /// Download target directory exists
    #[error("Directory {} already exists", path.display())]
    DownloadFolderAlreadyExists { path: PathBuf },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local filesystem failure with operation and path context
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl KeepError {
    /// Wrap an I/O error with the operation and path that produced it
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeepError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether a fresh attempt against the same endpoint could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            KeepError::Http(_) => true,
            KeepError::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for Keep operations
pub type Result<T> = std::result::Result<T, KeepError>;
