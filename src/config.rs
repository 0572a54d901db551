//! Configuration for the Keep client

use crate::error::{KeepError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest block a Keep server accepts
pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Default scratch directory for split chunks
pub fn default_scratch_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("keep-client")
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepConfig {
    /// API server host, e.g. `zzzzz.arvadosapi.com`
    #[serde(default)]
    pub api_host: String,

    /// Bearer token attached to every request
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_protocol")]
    pub api_protocol: String,

    /// keep-web host for the gateway transport
    #[serde(default)]
    pub keep_web_host: Option<String>,

    #[serde(default = "default_protocol")]
    pub keep_web_protocol: String,

    /// Desired replicas per block
    #[serde(default = "default_copies")]
    pub copies: u32,

    /// Extra attempts per endpoint for retryable failures
    #[serde(default)]
    pub num_retries: u32,

    /// Block size used when splitting uploads
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Directory under which per-upload scratch workspaces are created. Must exist.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (covers read and write)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Domain used to expand `K@<cluster>` hints
    #[serde(default = "default_gateway_domain")]
    pub gateway_domain: String,
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_copies() -> u32 {
    2
}

fn default_chunk_size() -> u64 {
    MAX_BLOCK_SIZE
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    300
}

fn default_gateway_domain() -> String {
    "arvadosapi.com".to_string()
}

impl Default for KeepConfig {
    fn default() -> Self {
        Self {
            api_host: String::new(),
            api_token: String::new(),
            api_protocol: default_protocol(),
            keep_web_host: None,
            keep_web_protocol: default_protocol(),
            copies: default_copies(),
            num_retries: 0,
            chunk_size: default_chunk_size(),
            scratch_dir: default_scratch_dir(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            gateway_domain: default_gateway_domain(),
        }
    }
}

impl KeepConfig {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KeepError::io("read config", path, e))?;
        toml::from_str(&content).map_err(|e| KeepError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| KeepError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| KeepError::io("write config", path, e))
    }

    /// Defaults overlaid with `ARVADOS_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay `ARVADOS_*` environment variables onto this config
    pub fn with_env(mut self) -> Self {
        if let Ok(host) = std::env::var("ARVADOS_API_HOST") {
            self.api_host = host;
        }
        if let Ok(token) = std::env::var("ARVADOS_API_TOKEN") {
            self.api_token = token;
        }
        if let Ok(host) = std::env::var("ARVADOS_KEEP_WEB_HOST") {
            self.keep_web_host = Some(host);
        }
        let insecure = std::env::var("ARVADOS_API_HOST_INSECURE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if insecure {
            self.api_protocol = "http".to_string();
            self.keep_web_protocol = "http".to_string();
        }
        self
    }

    /// Reject settings the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.api_host.is_empty() {
            return Err(KeepError::Config("api_host is not set".into()));
        }
        if self.api_token.is_empty() {
            return Err(KeepError::Config("api_token is not set".into()));
        }
        if self.chunk_size == 0 {
            return Err(KeepError::Config("chunk_size must be greater than 0".into()));
        }
        if self.chunk_size > MAX_BLOCK_SIZE {
            return Err(KeepError::Config(format!(
                "chunk_size {} exceeds the maximum block size {}",
                self.chunk_size, MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }

    /// `https://<api_host>/arvados/v1`
    pub fn api_base_url(&self) -> String {
        format!(
            "{}://{}/arvados/v1",
            self.api_protocol,
            self.api_host.trim_end_matches('/')
        )
    }

    /// `https://<keep_web_host>`, if a gateway is configured
    pub fn keep_web_base_url(&self) -> Option<String> {
        self.keep_web_host.as_ref().map(|host| {
            format!("{}://{}", self.keep_web_protocol, host.trim_end_matches('/'))
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
