/*!
Test harness for zonewatch integration tests

Bundles a running [`BackendStub`] with a scratch data directory, so a test
can point a kernel component at both without any setup of its own.
*/

use crate::backend_stub::BackendStub;
use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHarness {
    pub backend: BackendStub,
    data_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let backend = BackendStub::start().await?;
        let data_dir = tempfile::tempdir()?;
        log::info!("[harness] data dir {}", data_dir.path().display());
        Ok(Self { backend, data_dir })
    }

    pub fn base_url(&self) -> String {
        self.backend.base_url()
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.path().join("store.json")
    }

    /// Reads the persistent store file back, `None` while it does not exist yet.
    pub fn read_store(&self) -> Result<Option<Value>> {
        let path = self.store_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Polls until `path` has received at least `count` calls.
    pub async fn wait_for_calls(&self, path: &str, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.backend.calls(path) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        log::warn!("[harness] timeout waiting for {} calls on {}", count, path);
        false
    }

    /// YAML config pointing the kernel at the stub and the scratch directory.
    pub fn kernel_config_yaml(&self, ttl_secs: u64, refresh_interval_secs: u64) -> String {
        format!(
            "backend:\n  base_url: \"{}\"\n  timeout_secs: 5\n\
             cache:\n  ttl_secs: {}\n  refresh_interval_secs: {}\n\
             storage:\n  data_dir: \"{}\"\n",
            self.base_url(),
            ttl_secs,
            refresh_interval_secs,
            self.data_dir().display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_setup() {
        let harness = TestHarness::new().await.unwrap();
        assert!(harness.base_url().starts_with("http://127.0.0.1:"));
        assert!(harness.data_dir().exists());
        assert!(harness.read_store().unwrap().is_none());

        std::fs::write(harness.store_path(), r#"{"theme": "dark"}"#).unwrap();
        assert_eq!(harness.read_store().unwrap().unwrap()["theme"], "dark");

        let yaml = harness.kernel_config_yaml(300, 60);
        assert!(yaml.contains(&harness.base_url()));
        assert!(yaml.contains("refresh_interval_secs: 60"));

        assert!(!harness.wait_for_calls("/problems", 1, Duration::from_millis(50)).await);
    }
}
