//! Replicated block writes and ordered-failover reads
//!
//! The client owns its endpoint cache: a `ServiceSnapshot` built lazily
//! on first use and replaced wholesale by `refresh_services()`.

use crate::api::{ApiClient, KeepServicesSource};
use crate::config::KeepConfig;
use crate::error::{KeepError, Result};
use crate::locator::{md5_hex, Locator};
use crate::placement::ServiceSnapshot;
use crate::transport::{BlockTransport, HttpBlockTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RETRY_BASE_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Anything that can hand back the bytes of a block
#[async_trait]
pub trait ChunkReader: Send + Sync {
    async fn get_data_chunk(&self, locator: &Locator) -> Result<Bytes>;
}

/// Keep block client
pub struct KeepClient {
    config: Arc<KeepConfig>,
    services_source: Arc<dyn KeepServicesSource>,
    transport: Arc<dyn BlockTransport>,
    services: RwLock<Option<Arc<ServiceSnapshot>>>,
}

impl KeepClient {
    /// Client talking HTTP to the API server and storage endpoints
    pub fn new(config: Arc<KeepConfig>) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        let transport = Arc::new(HttpBlockTransport::new(&config)?);
        Ok(Self::with_transport(config, api, transport))
    }

    /// Client over explicit collaborators
    pub fn with_transport(
        config: Arc<KeepConfig>,
        services_source: Arc<dyn KeepServicesSource>,
        transport: Arc<dyn BlockTransport>,
    ) -> Self {
        Self {
            config,
            services_source,
            transport,
            services: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &KeepConfig {
        &self.config
    }

    /// Current endpoint snapshot, building it on first use
    pub async fn services(&self) -> Result<Arc<ServiceSnapshot>> {
        if let Some(snapshot) = self.services.read().await.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let mut guard = self.services.write().await;
        if let Some(snapshot) = guard.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(self.fetch_services().await?);
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Rebuild the endpoint snapshot from a fresh listing
    pub async fn refresh_services(&self) -> Result<Arc<ServiceSnapshot>> {
        let snapshot = Arc::new(self.fetch_services().await?);
        *self.services.write().await = Some(Arc::clone(&snapshot));
        info!(
            readable = snapshot.readable().len(),
            writable = snapshot.writable().len(),
            "Refreshed keep services"
        );
        Ok(snapshot)
    }

    async fn fetch_services(&self) -> Result<ServiceSnapshot> {
        let list = self
            .services_source
            .accessible()
            .await
            .map_err(|e| KeepError::ServiceListUnavailable(e.to_string()))?;
        ServiceSnapshot::build(list)
    }

    /// Store `data` with `copies` replicas and return a signed locator.
    ///
    /// With `copies < 1` nothing is sent and the unsigned locator is
    /// returned. Otherwise the block goes to the top-ranked writable
    /// endpoints concurrently; failed branches are logged and skipped, and
    /// the locator from the last branch to succeed is returned.
    pub async fn put(&self, data: impl Into<Bytes>, copies: u32) -> Result<String> {
        let data: Bytes = data.into();
        let locator = Locator::for_data(&data);
        if copies < 1 {
            return Ok(locator.to_string());
        }

        let services = self.services().await?;
        let roots = services.weighted_service_roots(&locator, true, &self.config.gateway_domain);
        let fanout = services.write_fanout(copies).min(roots.len());
        debug!(locator = %locator, fanout, candidates = roots.len(), "Writing block");

        let locator = &locator;
        let hash = locator.md5sum();
        let mut branches: FuturesUnordered<_> = roots
            .iter()
            .take(fanout)
            .map(|root| {
                let data = data.clone();
                async move {
                    let result = self
                        .with_retries(|| self.transport.put_block(root, hash, data.clone(), copies))
                        .await
                        .and_then(|signed| check_signed_locator(locator, signed));
                    (root, result)
                }
            })
            .collect();

        let mut stored = None;
        while let Some((root, result)) = branches.next().await {
            match result {
                Ok(signed) => {
                    debug!(root = %root, locator = %signed, "Block stored");
                    stored = Some(signed);
                }
                Err(e) => {
                    warn!(root = %root, locator = %locator, error = %e, "Block write failed");
                }
            }
        }

        stored.ok_or_else(|| KeepError::PutFailed {
            locator: locator.to_string(),
        })
    }

    /// Store the contents of a local chunk file
    pub async fn put_file(&self, path: &Path, copies: u32) -> Result<String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| KeepError::io("read data chunk", path, e))?;
        self.put(data, copies).await
    }

    /// Fetch a block, trying ranked endpoints in order until one answers
    pub async fn get_data_chunk(&self, locator: &Locator) -> Result<Bytes> {
        let services = self.services().await?;
        let roots = services.weighted_service_roots(locator, false, &self.config.gateway_domain);

        for root in &roots {
            let result = self
                .with_retries(|| self.transport.get_block(root, locator))
                .await
                .and_then(|data| check_block(locator, data));
            match result {
                Ok(data) => {
                    debug!(root = %root, locator = %locator, size = data.len(), "Fetched block");
                    return Ok(data);
                }
                Err(e) => {
                    warn!(
                        root = %root,
                        locator = %locator,
                        error = %e,
                        "Failed to fetch block, trying next service"
                    );
                }
            }
        }

        Err(KeepError::NoAvailableReplica)
    }

    /// Run `op`, retrying retryable failures with exponential backoff
    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempts < self.config.num_retries && e.is_retryable() => {
                    attempts += 1;
                    let delay = backoff_delay(attempts);
                    debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChunkReader for KeepClient {
    async fn get_data_chunk(&self, locator: &Locator) -> Result<Bytes> {
        KeepClient::get_data_chunk(self, locator).await
    }
}

/// Wait before retry number `attempt` (1-based): 100ms doubling, capped
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

/// The signed locator must name the block that was sent
fn check_signed_locator(sent: &Locator, signed: String) -> Result<String> {
    let parsed = Locator::parse(&signed)?;
    if parsed.stripped() != sent.stripped() {
        return Err(KeepError::MalformedLocator(format!(
            "server returned {} for block {}",
            signed, sent
        )));
    }
    Ok(signed)
}

/// Received bytes must hash to the locator's md5
fn check_block(locator: &Locator, data: Bytes) -> Result<Bytes> {
    let actual = md5_hex(&data);
    if actual != locator.md5sum() {
        return Err(KeepError::HashMismatch {
            expected: locator.md5sum().to_string(),
            actual,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_signed_locator() {
        let sent = Locator::for_data(b"foo");
        let signed = format!("{}+Aabc@00000010", sent);
        assert_eq!(check_signed_locator(&sent, signed.clone()).unwrap(), signed);

        let other = Locator::for_data(b"bar").to_string();
        assert!(check_signed_locator(&sent, other).is_err());
        assert!(check_signed_locator(&sent, "garbage".into()).is_err());
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(2), Duration::from_millis(200));
        assert_eq!(backoff_delay(4), Duration::from_millis(800));
        assert_eq!(backoff_delay(20), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(200), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_check_block() {
        let locator = Locator::for_data(b"foo");
        assert!(check_block(&locator, Bytes::from_static(b"foo")).is_ok());
        assert!(check_block(&locator, Bytes::from_static(b"fob")).is_err());
    }
}
