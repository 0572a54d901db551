//! Local file split/merge helpers for block uploads

use crate::error::{KeepError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

/// Concatenate `sources`, in order, into a new file at `dest`. Returns bytes written.
pub async fn merge_files(sources: &[PathBuf], dest: &Path) -> Result<u64> {
    let out = File::create(dest)
        .await
        .map_err(|e| KeepError::io("create combined file", dest, e))?;
    let mut out = BufWriter::new(out);

    let mut total = 0u64;
    for source in sources {
        let file = File::open(source)
            .await
            .map_err(|e| KeepError::io("open source file", source, e))?;
        let mut reader = BufReader::new(file);
        total += tokio::io::copy(&mut reader, &mut out)
            .await
            .map_err(|e| KeepError::io("append to combined file", dest, e))?;
    }

    out.flush()
        .await
        .map_err(|e| KeepError::io("flush combined file", dest, e))?;
    debug!(files = sources.len(), bytes = total, dest = %dest.display(), "Merged files");
    Ok(total)
}

/// Slice `source` into files of at most `chunk_size` bytes under `dest_dir`,
/// returned in order. An empty source yields no chunks.
pub async fn split_file(source: &Path, dest_dir: &Path, chunk_size: u64) -> Result<Vec<PathBuf>> {
    if chunk_size == 0 {
        return Err(KeepError::InvalidArgument("chunk size must be greater than 0".into()));
    }

    fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| KeepError::io("create chunk directory", dest_dir, e))?;

    let file = File::open(source)
        .await
        .map_err(|e| KeepError::io("open file to split", source, e))?;
    let mut remaining = file
        .metadata()
        .await
        .map_err(|e| KeepError::io("read file metadata", source, e))?
        .len();
    let mut reader = BufReader::new(file);

    let mut chunks = Vec::new();
    while remaining > 0 {
        let want = remaining.min(chunk_size);
        let chunk_path = dest_dir.join(format!("chunk-{:06}", chunks.len()));

        let out = File::create(&chunk_path)
            .await
            .map_err(|e| KeepError::io("create chunk file", &chunk_path, e))?;
        let mut out = BufWriter::new(out);
        let mut part = (&mut reader).take(want);
        let copied = tokio::io::copy(&mut part, &mut out)
            .await
            .map_err(|e| KeepError::io("write chunk file", &chunk_path, e))?;
        out.flush()
            .await
            .map_err(|e| KeepError::io("flush chunk file", &chunk_path, e))?;

        if copied != want {
            return Err(KeepError::io(
                "split file",
                source,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "file shrank while splitting"),
            ));
        }

        remaining -= copied;
        chunks.push(chunk_path);
    }

    debug!(source = %source.display(), chunks = chunks.len(), chunk_size, "Split file");
    Ok(chunks)
}
