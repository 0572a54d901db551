//! Collection uploads
//!
//! The block path concatenates the local files, cuts the result into
//! blocks, stores each block and records the files as byte ranges over the
//! resulting locators. The gateway path hands each file to keep-web as is.

use crate::api::CollectionStore;
use crate::config::KeepConfig;
use crate::error::{KeepError, Result};
use crate::gateway::{GatewayClient, ProgressCallback};
use crate::keep_client::KeepClient;
use crate::manifest::{self, FileEntry};
use crate::split::{merge_files, split_file};
use crate::types::Collection;
use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Uploads local files as collections
pub struct FileUploader {
    keep_client: Arc<KeepClient>,
    collections: Arc<dyn CollectionStore>,
    gateway: Option<Arc<GatewayClient>>,
    config: Arc<KeepConfig>,
}

impl FileUploader {
    pub fn new(
        keep_client: Arc<KeepClient>,
        collections: Arc<dyn CollectionStore>,
        gateway: Option<Arc<GatewayClient>>,
        config: Arc<KeepConfig>,
    ) -> Self {
        Self {
            keep_client,
            collections,
            gateway,
            config,
        }
    }

    /// Store `files` and create a new collection describing them.
    ///
    /// Without a name the collection is called
    /// `New Collection (<UTC timestamp>)`.
    pub async fn upload(
        &self,
        files: &[PathBuf],
        collection_name: Option<&str>,
        project_uuid: Option<&str>,
    ) -> Result<Collection> {
        let manifest_text = self.store_files(files).await?;
        let name = collection_name
            .map(str::to_string)
            .unwrap_or_else(|| Collection::default_name(Utc::now()));

        let collection = Collection::new(name, project_uuid.map(str::to_string), manifest_text);
        let created = self.collections.create(&collection).await?;
        info!(
            collection = created.uuid.as_deref().unwrap_or_default(),
            files = files.len(),
            "Created collection"
        );
        Ok(created)
    }

    /// Store `files` and append them to an existing collection's manifest
    pub async fn upload_to_existing_collection(
        &self,
        files: &[PathBuf],
        collection_uuid: &str,
    ) -> Result<Collection> {
        let fragment = self.store_files(files).await?;

        let mut collection = self.collections.get(collection_uuid).await?;
        let mut manifest_text = collection.manifest_text.take().unwrap_or_default();
        manifest_text.push_str(&fragment);
        collection.manifest_text = Some(manifest_text);

        let updated = self.collections.update(collection_uuid, &collection).await?;
        info!(collection = %collection_uuid, files = files.len(), "Updated collection");
        Ok(updated)
    }

    /// PUT each file straight to the gateway under its own name.
    /// `progress` sees bytes sent across all files so far.
    pub async fn upload_direct(
        &self,
        files: &[PathBuf],
        collection_uuid: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let gateway = self
            .gateway
            .as_deref()
            .ok_or_else(|| KeepError::Config("keep_web_host is not configured".into()))?;

        let mut sent_before = 0u64;
        for file in files {
            let size = file_size(file).await?;
            let entry = FileEntry::from_path(file, size)?;
            let total = progress.clone();
            let base = sent_before;
            let per_file: ProgressCallback = Arc::new(move |sent: u64| total(base + sent));

            gateway
                .upload(collection_uuid, &entry.name, file, per_file)
                .await?;
            sent_before += size;
        }

        info!(collection = %collection_uuid, files = files.len(), "Uploaded files through gateway");
        Ok(())
    }

    /// Merge, split and store `files`; returns the manifest fragment
    async fn store_files(&self, files: &[PathBuf]) -> Result<String> {
        if files.is_empty() {
            return Err(KeepError::InvalidArgument("no files to upload".into()));
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            entries.push(FileEntry::from_path(file, file_size(file).await?)?);
        }

        let scratch = &self.config.scratch_dir;
        let workspace = tempfile::Builder::new()
            .prefix("keep-upload-")
            .tempdir_in(scratch)
            .map_err(|e| KeepError::io("create scratch workspace", scratch, e))?;

        let combined = workspace.path().join("combined");
        let total = merge_files(files, &combined).await?;
        let chunks = split_file(&combined, &workspace.path().join("chunks"), self.config.chunk_size).await?;
        debug!(bytes = total, chunks = chunks.len(), "Split upload into data chunks");

        let copies = self.config.copies;
        let mut locators = Vec::with_capacity(chunks.len().max(1));
        for (i, chunk) in chunks.iter().enumerate() {
            locators.push(self.keep_client.put_file(chunk, copies).await?);
            debug!("{} of {} data chunks uploaded", i + 1, chunks.len());
        }
        if locators.is_empty() {
            locators.push(self.keep_client.put(Bytes::new(), copies).await?);
        }

        let manifest_text = manifest::encode(&entries, &locators);
        let workspace_path = workspace.path().to_path_buf();
        workspace
            .close()
            .map_err(|e| KeepError::io("remove scratch workspace", workspace_path, e))?;
        Ok(manifest_text)
    }
}

async fn file_size(path: &Path) -> Result<u64> {
    Ok(tokio::fs::metadata(path)
        .await
        .map_err(|e| KeepError::io("read file metadata", path, e))?
        .len())
}
