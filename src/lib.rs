//! Rust client for Keep content-addressed block storage
//!
//! # Example
//!
//! ```rust,no_run
//! use keep_client::{ApiClient, FileDownloader, FileUploader, KeepClient, KeepConfig};
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(KeepConfig::from_env());
//! let keep = Arc::new(KeepClient::new(config.clone())?);
//! let api = Arc::new(ApiClient::new(&config)?);
//!
//! // Store files as a new collection
//! let uploader = FileUploader::new(keep.clone(), api.clone(), None, config.clone());
//! let collection = uploader
//!     .upload(&[PathBuf::from("reads.bam")], Some("sequencing run"), None)
//!     .await?;
//!
//! // Rebuild them from their blocks
//! let downloader = FileDownloader::new(keep, api, None);
//! let uuid = collection.uuid.unwrap_or_default();
//! downloader
//!     .download_files_from_collection(&uuid, Path::new("/tmp/restore"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod gateway;
pub mod keep_client;
pub mod locator;
pub mod manifest;
pub mod placement;
pub mod split;
pub mod transport;
pub mod types;
pub mod upload;

// Re-export main types
pub use api::{ApiClient, CollectionStore, KeepServicesSource};
pub use config::KeepConfig;
pub use download::{BlockDrain, FileDownloader};
pub use error::{KeepError, Result};
pub use gateway::{GatewayClient, ProgressCallback};
pub use keep_client::{ChunkReader, KeepClient};
pub use locator::{GatewayHint, Locator, PermissionSignature};
pub use manifest::{FileEntry, FileToken, ManifestStream};
pub use placement::ServiceSnapshot;
pub use transport::{BlockTransport, HttpBlockTransport};
pub use types::*;
pub use upload::FileUploader;
