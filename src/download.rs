//! Collection downloads
//!
//! Two transports: block reconstruction (decode the manifest, fetch
//! blocks through the keep client, cut them back into files) and the
//! gateway, which serves files by path.

use crate::api::CollectionStore;
use crate::error::{KeepError, Result};
use crate::gateway::GatewayClient;
use crate::keep_client::ChunkReader;
use crate::locator::Locator;
use crate::manifest::{self, FileToken, ManifestStream};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use futures::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Walks one stream's blocks in order, handing out exact byte ranges to
/// consecutive files.
///
/// A block is fetched only once all bytes of the previous one have been
/// handed out. When a file ends inside a block, the rest of that block
/// stays loaded for the next file.
pub struct BlockDrain<'a, R: ChunkReader + ?Sized> {
    reader: &'a R,
    locators: &'a [Locator],
    next_index: usize,
    current: Bytes,
    consumed: usize,
    remaining_in_chunk: bool,
    bytes_owed: u64,
}

impl<'a, R: ChunkReader + ?Sized> BlockDrain<'a, R> {
    pub fn new(reader: &'a R, locators: &'a [Locator]) -> Self {
        Self {
            reader,
            locators,
            next_index: 0,
            current: Bytes::new(),
            consumed: 0,
            remaining_in_chunk: false,
            bytes_owed: 0,
        }
    }

    pub fn bytes_owed(&self) -> u64 {
        self.bytes_owed
    }

    pub fn set_bytes_owed(&mut self, bytes: u64) {
        self.bytes_owed = bytes;
    }

    /// Load the next block unless the current one still has unconsumed bytes
    pub async fn request_new_data_chunk(&mut self) -> Result<()> {
        if self.remaining_in_chunk {
            return Ok(());
        }
        let locator = self
            .locators
            .get(self.next_index)
            .ok_or(KeepError::MissingChunk)?;

        self.current = self.reader.get_data_chunk(locator).await?;
        self.consumed = 0;
        self.next_index += 1;
        debug!(
            "{} of {} data chunks from manifest stream downloaded",
            self.next_index,
            self.locators.len()
        );
        Ok(())
    }

    /// Write as much of the owed range as the current block holds
    pub async fn drain_into<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> std::io::Result<u64> {
        let available = (self.current.len() - self.consumed) as u64;

        if self.bytes_owed >= available {
            out.write_all(&self.current[self.consumed..]).await?;
            self.bytes_owed -= available;
            self.remaining_in_chunk = false;
            self.consumed = 0;
            Ok(available)
        } else {
            let owed = self.bytes_owed as usize;
            out.write_all(&self.current[self.consumed..self.consumed + owed])
                .await?;
            self.consumed += owed;
            self.remaining_in_chunk = true;
            self.bytes_owed = 0;
            Ok(owed as u64)
        }
    }

    /// Copy the next `size` bytes of the stream into `out`
    pub async fn copy_file<W: AsyncWrite + Unpin>(
        &mut self,
        size: u64,
        out: &mut W,
        path: &Path,
    ) -> Result<()> {
        self.set_bytes_owed(size);
        while self.bytes_owed > 0 {
            self.request_new_data_chunk().await?;
            self.drain_into(out)
                .await
                .map_err(|e| KeepError::io("write file", path, e))?;
        }
        Ok(())
    }
}

/// Downloads collections as local files
pub struct FileDownloader {
    reader: Arc<dyn ChunkReader>,
    collections: Arc<dyn CollectionStore>,
    gateway: Option<Arc<GatewayClient>>,
}

impl FileDownloader {
    pub fn new(
        reader: Arc<dyn ChunkReader>,
        collections: Arc<dyn CollectionStore>,
        gateway: Option<Arc<GatewayClient>>,
    ) -> Self {
        Self {
            reader,
            collections,
            gateway,
        }
    }

    fn gateway(&self) -> Result<&GatewayClient> {
        self.gateway
            .as_deref()
            .ok_or_else(|| KeepError::Config("keep_web_host is not configured".into()))
    }

    async fn fetch_streams(&self, collection_uuid: &str) -> Result<Vec<ManifestStream>> {
        let collection = self.collections.get(collection_uuid).await?;
        manifest::decode(collection.manifest_text.as_deref().unwrap_or_default())
    }

    /// Every file token in the collection, stream by stream
    pub async fn list_file_info_from_collection(&self, collection_uuid: &str) -> Result<Vec<FileToken>> {
        Ok(self
            .fetch_streams(collection_uuid)
            .await?
            .into_iter()
            .flat_map(|s| s.file_tokens)
            .collect())
    }

    /// Rebuild every file of the collection from its blocks under
    /// `<download_dir>/<collection_uuid>/`
    pub async fn download_files_from_collection(
        &self,
        collection_uuid: &str,
        download_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let streams = self.fetch_streams(collection_uuid).await?;
        let target_dir = create_target_directory(collection_uuid, download_dir).await?;

        let mut downloaded = Vec::new();
        for stream in &streams {
            downloaded.extend(self.download_stream(stream, &target_dir).await?);
        }

        info!(collection = %collection_uuid, files = downloaded.len(), "Total of {} files downloaded", downloaded.len());
        Ok(downloaded)
    }

    async fn download_stream(&self, stream: &ManifestStream, target_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut drain = BlockDrain::new(self.reader.as_ref(), &stream.locators);
        let mut files = Vec::with_capacity(stream.file_tokens.len());

        for (i, token) in stream.file_tokens.iter().enumerate() {
            let path = safe_join(target_dir, &token.full_path())?;
            create_parent_dirs(&path).await?;

            let mut file = create_new_file(&path).await?;
            drain.copy_file(token.size, &mut file, &path).await?;
            file.flush()
                .await
                .map_err(|e| KeepError::io("flush file", &path, e))?;

            debug!(
                "File {} / {} downloaded from manifest stream",
                i + 1,
                stream.file_tokens.len()
            );
            files.push(path);
        }

        Ok(files)
    }

    /// Fetch one file through the gateway into `download_dir/<file name>`
    pub async fn download_single_file_using_gateway(
        &self,
        file_path: &str,
        collection_uuid: &str,
        download_dir: &Path,
    ) -> Result<PathBuf> {
        let token = self
            .list_file_info_from_collection(collection_uuid)
            .await?
            .into_iter()
            .find(|t| t.full_path() == file_path)
            .ok_or_else(|| {
                KeepError::NotFound(format!(
                    "{} not found in Collection with UUID {}",
                    file_path, collection_uuid
                ))
            })?;

        let gateway = self.gateway()?;
        let dest = safe_join(download_dir, &token.name)?;
        let mut file = create_new_file(&dest).await?;

        let written = async {
            let data = gateway.download(collection_uuid, file_path).await?;
            file.write_all(&data)
                .await
                .map_err(|e| KeepError::io("write file", &dest, e))?;
            file.flush()
                .await
                .map_err(|e| KeepError::io("flush file", &dest, e))
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove) = fs::remove_file(&dest).await {
                warn!(path = %dest.display(), error = %remove, "Failed to remove incomplete download");
            }
            return Err(e);
        }
        Ok(dest)
    }

    /// Fetch every file through the gateway, one request per file in
    /// flight at once; results keep manifest order
    pub async fn download_files_from_collection_using_gateway(
        &self,
        collection_uuid: &str,
        download_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let gateway = self.gateway()?;
        let tokens = self.list_file_info_from_collection(collection_uuid).await?;
        let target_dir = create_target_directory(collection_uuid, download_dir).await?;

        let downloads = tokens.iter().map(|token| {
            let target_dir = &target_dir;
            async move {
                let file_path = token.full_path();
                let dest = safe_join(target_dir, &file_path)?;
                create_parent_dirs(&dest).await?;
                let data = gateway.download(collection_uuid, &file_path).await?;
                write_new_file(&dest, &data).await?;
                Ok::<_, KeepError>(dest)
            }
        });

        let files = futures::future::join_all(downloads)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        info!(collection = %collection_uuid, files = files.len(), "Downloaded collection through gateway");
        Ok(files)
    }

    /// Resume a partial download: write the file's bytes from `offset`
    /// onwards into `download_dir/<file_name>` at the same offset
    pub async fn download_file_with_resume(
        &self,
        collection_uuid: &str,
        file_name: &str,
        download_dir: &Path,
        offset: u64,
        buffer_size: usize,
    ) -> Result<PathBuf> {
        if buffer_size == 0 {
            return Err(KeepError::InvalidArgument(
                "Buffer size must be greater than 0".into(),
            ));
        }

        let dest = safe_join(download_dir, file_name)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&dest)
            .await
            .map_err(|e| KeepError::io("open file for resume", &dest, e))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| KeepError::io("seek", &dest, e))?;

        let stream = self
            .gateway()?
            .download_partial_stream(collection_uuid, file_name, offset, None)
            .await?;
        futures::pin_mut!(stream);

        let mut writer = BufWriter::with_capacity(buffer_size, file);
        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| KeepError::io("write file", &dest, e))?;
            received += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| KeepError::io("flush file", &dest, e))?;

        debug!(path = %dest.display(), offset, bytes = received, "Resumed download");
        Ok(dest)
    }
}

/// `<download_dir>/<collection_uuid>`, which must not exist yet
async fn create_target_directory(collection_uuid: &str, download_dir: &Path) -> Result<PathBuf> {
    let target = safe_join(download_dir, collection_uuid)?;
    if fs::try_exists(&target)
        .await
        .map_err(|e| KeepError::io("check download directory", &target, e))?
    {
        return Err(KeepError::DownloadFolderAlreadyExists { path: target });
    }
    fs::create_dir_all(&target)
        .await
        .map_err(|e| KeepError::io("create download directory", &target, e))?;
    Ok(target)
}

async fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| KeepError::io("create directory", parent, e))?;
    }
    Ok(())
}

async fn create_new_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => KeepError::FileAlreadyExists {
                path: path.to_path_buf(),
            },
            _ => KeepError::io("create file", path, e),
        })
}

async fn write_new_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = create_new_file(path).await?;
    file.write_all(data)
        .await
        .map_err(|e| KeepError::io("write file", path, e))?;
    file.flush()
        .await
        .map_err(|e| KeepError::io("flush file", path, e))
}

/// Join a collection-relative path under `base`, refusing anything that
/// would land outside it
fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(KeepError::InvalidManifest(format!(
            "unsafe file path in collection: {}",
            relative
        )));
    }
    Ok(base.join(rel))
}
