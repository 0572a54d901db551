//! Wire types for the Keep API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service type of a plain storage server
pub const SERVICE_TYPE_DISK: &str = "disk";
/// Prefix of service types that are only reachable through locator hints
pub const SERVICE_TYPE_GATEWAY_PREFIX: &str = "gateway:";

/// A storage endpoint as listed by `keep_services/accessible`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepService {
    pub uuid: String,
    pub service_host: String,
    pub service_port: u16,
    #[serde(default)]
    pub service_ssl_flag: bool,
    /// "disk", "proxy", or "gateway:*"
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default)]
    pub read_only: bool,
}

fn default_service_type() -> String {
    SERVICE_TYPE_DISK.to_string()
}

impl KeepService {
    /// Base URI, e.g. `https://keep0.example:25107/`. IPv6 literals are bracketed.
    pub fn service_root(&self) -> String {
        let host = if !self.service_host.starts_with('[') && self.service_host.contains(':') {
            format!("[{}]", self.service_host)
        } else {
            self.service_host.clone()
        };
        let scheme = if self.service_ssl_flag { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, host, self.service_port)
    }

    pub fn is_gateway(&self) -> bool {
        self.service_type.starts_with(SERVICE_TYPE_GATEWAY_PREFIX)
    }

    pub fn is_disk(&self) -> bool {
        self.service_type == SERVICE_TYPE_DISK
    }
}

/// Response from `keep_services/accessible`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepServiceList {
    #[serde(default)]
    pub items: Vec<KeepService>,
    #[serde(default)]
    pub items_available: Option<u64>,
}

/// Collection resource. Only the fields this client reads or writes are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portable_data_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Collection {
    /// A not-yet-created collection carrying `manifest_text`
    pub fn new(name: impl Into<String>, owner_uuid: Option<String>, manifest_text: String) -> Self {
        Self {
            name: Some(name.into()),
            owner_uuid,
            manifest_text: Some(manifest_text),
            ..Default::default()
        }
    }

    /// Default name for collections created without one
    pub fn default_name(now: DateTime<Utc>) -> String {
        format!("New Collection ({})", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Request envelope for collection create/update
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRequest<'a> {
    pub collection: &'a Collection,
}
