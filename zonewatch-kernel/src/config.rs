use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use crate::models::DashboardVariant;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub dashboards: DashboardsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,                 // ex: "http://localhost:5000/api"
    pub token: Option<String>,            // sent as bearer token when set
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardsConfig {
    pub variants: Vec<DashboardVariant>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".into(),
            token: None,
            timeout_secs: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300, refresh_interval_secs: 300 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_key: None,
        }
    }
}

impl Default for DashboardsConfig {
    fn default() -> Self {
        Self { variants: DashboardVariant::ALL.to_vec() }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl KernelConfig {
    pub fn parse(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).await?;
        Self::parse(&txt)
    }

    /// Environment variables win over the file (typically set through `.env`).
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("ZONEWATCH_BACKEND_URL") {
            if !url.is_empty() {
                self.backend.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("ZONEWATCH_BACKEND_TOKEN") {
            if !token.is_empty() {
                self.backend.token = Some(token);
            }
        }
        if let Ok(key) = std::env::var("ZONEWATCH_API_KEY") {
            if !key.is_empty() {
                self.server.api_key = Some(key);
            }
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("ZONEWATCH_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        KernelConfig::from_file(Path::new(&path)).await.unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}, using defaults");
            KernelConfig::default()
        })
    } else {
        info!("no {path} found, using default config");
        KernelConfig::default()
    };
    cfg.apply_env();
    cfg
}
