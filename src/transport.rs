//! Raw block transport
//!
//! Storage endpoints accept `PUT <root><md5>` with the block as body and
//! answer with the signed locator; `GET <root><locator>` returns the block.

use crate::config::KeepConfig;
use crate::error::{KeepError, Result};
use crate::locator::Locator;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};

/// Tells a proxy how many copies the client wants stored
pub const X_KEEP_DESIRED_REPLICAS: &str = "X-Keep-Desired-Replicas";

/// Block-level I/O against one storage endpoint root
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Store `data` under `hash` at `root`, returning the locator the endpoint signed
    async fn put_block(&self, root: &str, hash: &str, data: Bytes, copies: u32) -> Result<String>;

    /// Fetch the block named by `locator` from `root`
    async fn get_block(&self, root: &str, locator: &Locator) -> Result<Bytes>;
}

/// Build a reqwest client carrying the bearer token and the configured timeouts
pub(crate) fn http_client(config: &KeepConfig) -> Result<Client> {
    let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", config.api_token))
        .map_err(|_| KeepError::Config("API token is not a valid header value".into()))?;
    auth.set_sensitive(true);

    let mut headers = header::HeaderMap::new();
    headers.insert(header::AUTHORIZATION, auth);

    Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(KeepError::Http)
}

/// Map non-success statuses onto `KeepError`
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(KeepError::NotFound(response.url().to_string()));
    }
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(KeepError::Server { status, message });
    }
    Ok(response)
}

/// reqwest-backed block transport
pub struct HttpBlockTransport {
    client: Client,
}

impl HttpBlockTransport {
    pub fn new(config: &KeepConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl BlockTransport for HttpBlockTransport {
    async fn put_block(&self, root: &str, hash: &str, data: Bytes, copies: u32) -> Result<String> {
        let url = format!("{}{}", root, hash);
        let response = self
            .client
            .put(&url)
            .header(X_KEEP_DESIRED_REPLICAS, copies.to_string())
            .body(data)
            .send()
            .await?;

        let body = check_status(response).await?.text().await?;
        Ok(body.trim().to_string())
    }

    async fn get_block(&self, root: &str, locator: &Locator) -> Result<Bytes> {
        let url = format!("{}{}", root, locator);
        let response = self.client.get(&url).send().await?;
        Ok(check_status(response).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOCATOR: &str = "acbd18db4cc2f85cedef654fccc4a4d8+3";

    fn config() -> KeepConfig {
        KeepConfig {
            api_token: "secret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_sends_replica_header_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/acbd18db4cc2f85cedef654fccc4a4d8"))
            .and(header_eq(X_KEEP_DESIRED_REPLICAS, "2"))
            .and(header_eq("authorization", "Bearer secret"))
            .and(body_bytes(b"foo".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}+Aabc@00000010\n", LOCATOR)))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpBlockTransport::new(&config()).unwrap();
        let root = format!("{}/", server.uri());
        let signed = transport
            .put_block(&root, "acbd18db4cc2f85cedef654fccc4a4d8", Bytes::from_static(b"foo"), 2)
            .await
            .unwrap();
        assert_eq!(signed, format!("{}+Aabc@00000010", LOCATOR));
    }

    #[tokio::test]
    async fn test_get_maps_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{}", LOCATOR)))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let transport = HttpBlockTransport::new(&config()).unwrap();
        let root = format!("{}/", server.uri());
        let err = transport
            .get_block(&root, &Locator::parse(LOCATOR).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, KeepError::Server { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{}", LOCATOR)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"foo".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpBlockTransport::new(&config()).unwrap();
        let root = format!("{}/", server.uri());
        let data = transport
            .get_block(&root, &Locator::parse(LOCATOR).unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"foo");
    }
}
