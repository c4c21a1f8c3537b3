use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub dashboards_tracked: u32,
    pub memory_usage_mb: f32,
    pub backend_status: String,
    pub refresh_failures: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_successful_refresh: Option<OffsetDateTime>,
    /// Persistent banner shown while the backend is unavailable.
    pub banner: Option<String>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    refresh_failures: Arc<AtomicU32>,
    backend_status: Arc<Mutex<String>>,
    banner: Arc<Mutex<Option<String>>>,
    last_success: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            refresh_failures: Arc::new(AtomicU32::new(0)),
            backend_status: Arc::new(Mutex::new("unknown".to_string())),
            banner: Arc::new(Mutex::new(None)),
            last_success: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_backend_available(&self) {
        *self.backend_status.lock() = "available".to_string();
        *self.banner.lock() = None;
        *self.last_success.lock() = Some(OffsetDateTime::now_utc());
    }

    /// Stale data stays on screen; the banner explains why it is stale.
    pub fn mark_backend_unavailable(&self, reason: &str) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        *self.backend_status.lock() = "unavailable".to_string();
        *self.banner.lock() = Some(format!("Backend unavailable, showing last known data ({reason})"));
    }

    pub fn banner(&self) -> Option<String> {
        self.banner.lock().clone()
    }

    pub fn get_health(&self, dashboards_tracked: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dashboards_tracked: dashboards_tracked as u32,
            memory_usage_mb: get_memory_usage_mb(),
            backend_status: self.backend_status.lock().clone(),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            last_successful_refresh: *self.last_success.lock(),
            banner: self.banner(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return (kb as f32) / 1024.0; // KB -> MB
                        }
                    }
                }
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lifecycle() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.get_health(0).backend_status, "unknown");

        tracker.mark_backend_unavailable("HTTP 503");
        tracker.mark_backend_unavailable("HTTP 503");
        let health = tracker.get_health(3);
        assert_eq!(health.backend_status, "unavailable");
        assert_eq!(health.refresh_failures, 2);
        assert!(health.banner.unwrap().contains("HTTP 503"));

        tracker.mark_backend_available();
        let health = tracker.get_health(3);
        assert!(health.banner.is_none());
        assert!(health.last_successful_refresh.is_some());
        assert_eq!(health.refresh_failures, 2);
        assert_eq!(health.dashboards_tracked, 3);
    }
}
