//! Gateway (keep-web) transport
//!
//! Files are addressed by collection and path, `<base>/c=<uuid>/<path>`,
//! with no client-side chunking or manifest bookkeeping.

use crate::config::KeepConfig;
use crate::error::{KeepError, Result};
use crate::transport::{check_status, http_client};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Body, Client, Response};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const UPLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Receives the cumulative number of bytes sent
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// HTTP client for the collection gateway
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    /// Client for the configured keep-web host
    pub fn new(config: &KeepConfig) -> Result<Self> {
        let base_url = config
            .keep_web_base_url()
            .ok_or_else(|| KeepError::Config("keep_web_host is not configured".into()))?;
        Ok(Self {
            client: http_client(config)?,
            base_url,
        })
    }

    fn file_url(&self, collection_uuid: &str, file_path: &str) -> String {
        let encoded: Vec<String> = file_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/c={}/{}", self.base_url, collection_uuid, encoded.join("/"))
    }

    /// Stream `local_file` to `file_path` inside the collection
    pub async fn upload(
        &self,
        collection_uuid: &str,
        file_path: &str,
        local_file: &Path,
        progress: ProgressCallback,
    ) -> Result<()> {
        let file = File::open(local_file)
            .await
            .map_err(|e| KeepError::io("open upload file", local_file, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| KeepError::io("read file metadata", local_file, e))?
            .len();

        let body = futures::stream::unfold((file, 0u64, progress), |(mut file, sent, progress)| async move {
            let mut buf = vec![0u8; UPLOAD_BUFFER_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    let sent = sent + n as u64;
                    progress(sent);
                    Some((Ok(Bytes::from(buf)), (file, sent, progress)))
                }
                Err(e) => Some((Err(e), (file, sent, progress))),
            }
        });

        let url = self.file_url(collection_uuid, file_path);
        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(body))
            .send()
            .await?;
        check_status(response).await?;

        info!(collection = %collection_uuid, path = %file_path, bytes = size, "Uploaded file through gateway");
        Ok(())
    }

    /// Whole-file GET
    pub async fn download(&self, collection_uuid: &str, file_path: &str) -> Result<Bytes> {
        let url = self.file_url(collection_uuid, file_path);
        let response = self.client.get(&url).send().await?;
        let data = check_status(response).await?.bytes().await?;
        debug!(collection = %collection_uuid, path = %file_path, bytes = data.len(), "Downloaded file");
        Ok(data)
    }

    /// Ranged GET, `bytes=<offset>-[<end>]` with `end` inclusive
    pub async fn download_partial(
        &self,
        collection_uuid: &str,
        file_path: &str,
        offset: u64,
        end: Option<u64>,
    ) -> Result<Bytes> {
        let data = self
            .ranged_get(collection_uuid, file_path, offset, end)
            .await?
            .bytes()
            .await?;
        debug!(collection = %collection_uuid, path = %file_path, offset, bytes = data.len(), "Downloaded range");
        Ok(data)
    }

    /// Ranged GET whose body is handed out as it arrives
    pub async fn download_partial_stream(
        &self,
        collection_uuid: &str,
        file_path: &str,
        offset: u64,
        end: Option<u64>,
    ) -> Result<impl Stream<Item = Result<Bytes>> + Send + 'static> {
        let response = self.ranged_get(collection_uuid, file_path, offset, end).await?;
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(KeepError::Http)))
    }

    async fn ranged_get(
        &self,
        collection_uuid: &str,
        file_path: &str,
        offset: u64,
        end: Option<u64>,
    ) -> Result<Response> {
        let range = match end {
            Some(end) => format!("bytes={}-{}", offset, end),
            None => format!("bytes={}-", offset),
        };
        let url = self.file_url(collection_uuid, file_path);
        let response = self
            .client
            .get(&url)
            .header(header::RANGE, &range)
            .send()
            .await?;
        check_status(response).await
    }

    /// Remove a file from the collection
    pub async fn delete(&self, collection_uuid: &str, file_path: &str) -> Result<()> {
        let url = self.file_url(collection_uuid, file_path);
        let response = self.client.delete(&url).send().await?;
        check_status(response).await?;
        info!(collection = %collection_uuid, path = %file_path, "Deleted file through gateway");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UUID: &str = "zzzzz-4zz18-000000000000000";

    fn client_for(server: &MockServer) -> GatewayClient {
        let config = KeepConfig {
            api_token: "secret".into(),
            keep_web_host: Some(server.address().to_string()),
            keep_web_protocol: "http".into(),
            ..Default::default()
        };
        GatewayClient::new(&config).unwrap()
    }

    #[test]
    fn test_requires_keep_web_host() {
        assert!(matches!(
            GatewayClient::new(&KeepConfig::default()),
            Err(KeepError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_file_url_escapes_segments() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        assert_eq!(
            client.file_url(UUID, "dir/my file.txt"),
            format!("{}/c={}/dir/my%20file.txt", server.uri(), UUID)
        );
    }

    #[tokio::test]
    async fn test_upload_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/c={}/data.bin", UUID)))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("data.bin");
        std::fs::write(&local, vec![7u8; 150_000]).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |sent: u64| seen_cb.store(sent, Ordering::SeqCst));

        client_for(&server)
            .upload(UUID, "data.bin", &local, progress)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 150_000);
    }

    #[tokio::test]
    async fn test_download_partial_sends_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/c={}/data.bin", UUID)))
            .and(header_eq("range", "bytes=10-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"tail".to_vec()))
            .mount(&server)
            .await;

        let data = client_for(&server)
            .download_partial(UUID, "data.bin", 10, None)
            .await
            .unwrap();
        assert_eq!(&data[..], b"tail");
    }

    #[tokio::test]
    async fn test_download_partial_stream() {
        let server = MockServer::start().await;
        let body = vec![3u8; 200_000];
        Mock::given(method("GET"))
            .and(path(format!("/c={}/big.bin", UUID)))
            .and(header_eq("range", "bytes=5-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let stream = client
            .download_partial_stream(UUID, "big.bin", 5, None)
            .await
            .unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), body);
    }

    #[tokio::test]
    async fn test_download_partial_stream_missing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .download_partial_stream(UUID, "gone.bin", 0, None)
            .await;
        assert!(matches!(result, Err(KeepError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("/c={}/old.txt", UUID)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).delete(UUID, "old.txt").await.unwrap();
    }
}
