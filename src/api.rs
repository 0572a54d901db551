//! JSON API collaborators: accessible keep services and collections

use crate::config::KeepConfig;
use crate::error::Result;
use crate::transport::{check_status, http_client};
use crate::types::{Collection, CollectionRequest, KeepServiceList};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Source of the accessible storage endpoints
#[async_trait]
pub trait KeepServicesSource: Send + Sync {
    async fn accessible(&self) -> Result<KeepServiceList>;
}

/// Collection create/get/update. The manifest text is an opaque field here.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn get(&self, uuid: &str) -> Result<Collection>;
    async fn create(&self, collection: &Collection) -> Result<Collection>;
    async fn update(&self, uuid: &str, collection: &Collection) -> Result<Collection>;
}

/// reqwest client for the `/arvados/v1` API
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &KeepConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.api_base_url(),
        })
    }

    fn collection_url(&self, uuid: &str) -> String {
        format!("{}/collections/{}", self.base_url, urlencoding::encode(uuid))
    }
}

#[async_trait]
impl KeepServicesSource for ApiClient {
    async fn accessible(&self) -> Result<KeepServiceList> {
        let url = format!("{}/keep_services/accessible", self.base_url);
        let response = self.client.get(&url).send().await?;
        let list: KeepServiceList = check_status(response).await?.json().await?;
        debug!(count = list.items.len(), "Fetched accessible keep services");
        Ok(list)
    }
}

#[async_trait]
impl CollectionStore for ApiClient {
    async fn get(&self, uuid: &str) -> Result<Collection> {
        let response = self.client.get(self.collection_url(uuid)).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn create(&self, collection: &Collection) -> Result<Collection> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CollectionRequest { collection })
            .send()
            .await?;
        let created: Collection = check_status(response).await?.json().await?;
        debug!(uuid = ?created.uuid, "Created collection");
        Ok(created)
    }

    async fn update(&self, uuid: &str, collection: &Collection) -> Result<Collection> {
        let response = self
            .client
            .put(self.collection_url(uuid))
            .json(&CollectionRequest { collection })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeepError;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ApiClient {
        let config = KeepConfig {
            api_host: server.address().to_string(),
            api_protocol: "http".into(),
            api_token: "secret".into(),
            ..Default::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_accessible() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/arvados/v1/keep_services/accessible"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "uuid": "zzzzz-bi6l4-000000000000000",
                    "service_host": "keep0.zzzzz.example",
                    "service_port": 25107,
                    "service_ssl_flag": true,
                    "service_type": "disk",
                    "read_only": false
                }]
            })))
            .mount(&server)
            .await;

        let list = client_for(&server).await.accessible().await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].service_root(), "https://keep0.zzzzz.example:25107/");
    }

    #[tokio::test]
    async fn test_create_wraps_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/arvados/v1/collections"))
            .and(body_partial_json(json!({"collection": {"name": "c1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uuid": "zzzzz-4zz18-000000000000000",
                "name": "c1",
                "manifest_text": ". d41d8cd98f00b204e9800998ecf8427e+0 0:0:a\n"
            })))
            .mount(&server)
            .await;

        let collection = Collection::new("c1", None, ". d41d8cd98f00b204e9800998ecf8427e+0 0:0:a\n".into());
        let created = client_for(&server).await.create(&collection).await.unwrap();
        assert_eq!(created.uuid.as_deref(), Some("zzzzz-4zz18-000000000000000"));
    }

    #[tokio::test]
    async fn test_get_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/arvados/v1/collections/zzzzz-4zz18-missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get("zzzzz-4zz18-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, KeepError::NotFound(_)));
    }
}
