//! Application context: inventory plus one dashboard cache per variant.
//!
//! Everything the REST layer serves is read from here. Each inventory list is
//! refreshed independently; a failing endpoint keeps its previous list.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api_client::{ApiClient, ApiResponse};
use crate::dashboard::DashboardCache;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{
    DashboardVariant, Host, ManagementZone, ProblemStatus, ProcessGroup, RawManagementZone,
    Service, Summary, ZoneHealth,
};
use crate::state::{new_state, Shared};
use crate::storage::{KeyValueStore, DASHBOARD_KEY_PREFIX};

#[derive(Debug, Default, Clone)]
pub struct Inventory {
    pub zones: Vec<RawManagementZone>,
    pub hosts: Vec<Host>,
    pub services: Vec<Service>,
    pub process_groups: Vec<ProcessGroup>,
    pub summary: Option<Summary>,
    /// Last error per endpoint, cleared on the next success.
    pub errors: BTreeMap<String, String>,
}

/// Kernel health plus backend traffic and cache occupancy.
#[derive(Debug, Serialize)]
pub struct SystemHealth {
    #[serde(flatten)]
    pub kernel: KernelHealth,
    /// Requests actually sent to the backend since start.
    pub backend_calls: u64,
    pub cached_responses: usize,
    pub stored_snapshots: usize,
    /// Inventory endpoints whose last refresh failed.
    pub inventory_errors: BTreeMap<String, String>,
}

pub struct AppContext {
    client: Arc<ApiClient>,
    inventory: Shared<Inventory>,
    dashboards: HashMap<DashboardVariant, Arc<DashboardCache>>,
    pub health: HealthTracker,
    pub store: Arc<KeyValueStore>,
    pub session: Arc<KeyValueStore>,
}

impl AppContext {
    pub fn new(
        client: Arc<ApiClient>,
        store: Arc<KeyValueStore>,
        variants: &[DashboardVariant],
        health: HealthTracker,
    ) -> Self {
        let ttl = client.ttl();
        let dashboards = variants
            .iter()
            .map(|&variant| {
                let cache = DashboardCache::new(variant, Arc::clone(&client), Arc::clone(&store), ttl)
                    .with_health_tracker(health.clone());
                (variant, Arc::new(cache))
            })
            .collect();

        Self {
            client,
            inventory: new_state(Inventory::default()),
            dashboards,
            health,
            store,
            session: Arc::new(KeyValueStore::ephemeral()),
        }
    }

    pub fn dashboard(&self, variant: DashboardVariant) -> Option<&Arc<DashboardCache>> {
        self.dashboards.get(&variant)
    }

    pub fn dashboards(&self) -> Vec<&Arc<DashboardCache>> {
        let mut list: Vec<_> = self.dashboards.values().collect();
        list.sort_by_key(|d| d.variant());
        list
    }

    /// Initial load of every dashboard plus the inventory, then periodic refresh.
    pub async fn start(&self, refresh_every: Duration) {
        for dashboard in self.dashboards() {
            let outcome = dashboard.initialize().await;
            info!("[{}] initial load: {outcome:?}", dashboard.variant());
            dashboard.spawn_background_refresh(refresh_every);
        }
        self.refresh_inventory(None, false).await;
    }

    pub fn shutdown(&self) {
        for dashboard in self.dashboards.values() {
            dashboard.close();
        }
    }

    pub async fn refresh_inventory(&self, zone: Option<&str>, force: bool) {
        let use_cache = !force;
        let (zones, hosts, services, process_groups, summary) = tokio::join!(
            self.client.management_zones(use_cache),
            self.client.hosts(zone, use_cache),
            self.client.services(zone, use_cache),
            self.client.process_groups(zone, use_cache),
            self.client.summary(use_cache),
        );

        let mut inventory = self.inventory.lock();
        apply("management-zones", zones, &mut inventory, |inv, v| inv.zones = v);
        apply("hosts", hosts, &mut inventory, |inv, v| inv.hosts = v);
        apply("services", services, &mut inventory, |inv, v| inv.services = v);
        apply("processes", process_groups, &mut inventory, |inv, v| inv.process_groups = v);
        apply("summary", summary, &mut inventory, |inv, v| inv.summary = Some(v));
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth {
            kernel: self.health.get_health(self.dashboards.len()),
            backend_calls: self.client.network_calls(),
            cached_responses: self.client.cached_entries(),
            stored_snapshots: self
                .store
                .keys()
                .iter()
                .filter(|k| k.starts_with(DASHBOARD_KEY_PREFIX))
                .count(),
            inventory_errors: self.inventory.lock().errors.clone(),
        }
    }

    pub fn hosts(&self, zone: Option<&str>) -> Vec<Host> {
        filter_by_zone(&self.inventory.lock().hosts, zone, |h| h.zone.as_deref())
    }

    pub fn services(&self, zone: Option<&str>) -> Vec<Service> {
        filter_by_zone(&self.inventory.lock().services, zone, |s| s.zone.as_deref())
    }

    pub fn process_groups(&self, zone: Option<&str>) -> Vec<ProcessGroup> {
        filter_by_zone(&self.inventory.lock().process_groups, zone, |p| p.zone.as_deref())
    }

    pub fn summary(&self) -> Option<Summary> {
        self.inventory.lock().summary.clone()
    }

    /// Zones with health derived from their open problems. The backend count
    /// wins; otherwise problems of the unified dashboard are counted by zone.
    pub fn zones(&self) -> Vec<ManagementZone> {
        let open_by_zone = self.open_problems_by_zone();
        let raw_zones = self.inventory.lock().zones.clone();

        raw_zones
            .into_iter()
            .map(|raw| {
                let problem_count = raw
                    .problem_count
                    .unwrap_or_else(|| open_by_zone.get(&raw.name).copied().unwrap_or(0));
                ManagementZone {
                    health: ZoneHealth::from_problem_count(problem_count),
                    id: raw.id,
                    name: raw.name,
                    host_count: raw.host_count,
                    service_count: raw.service_count,
                    application_count: raw.application_count,
                    problem_count,
                }
            })
            .collect()
    }

    pub fn zone(&self, id: &str) -> Option<ManagementZone> {
        self.zones().into_iter().find(|z| z.id == id || z.name == id)
    }

    fn open_problems_by_zone(&self) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        let source = self
            .dashboard(DashboardVariant::Unified)
            .or_else(|| self.dashboards().into_iter().next());
        if let Some(dashboard) = source {
            for problem in dashboard.state().active_problems {
                if problem.status == ProblemStatus::Open {
                    *counts.entry(problem.zone).or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

fn apply<T>(
    endpoint: &str,
    response: ApiResponse<T>,
    inventory: &mut Inventory,
    set: impl FnOnce(&mut Inventory, T),
) {
    match response.into_result() {
        Ok(value) => {
            set(inventory, value);
            inventory.errors.remove(endpoint);
        }
        Err(e) => {
            warn!("keeping previous {endpoint}: {e}");
            inventory.errors.insert(endpoint.to_string(), e.to_string());
        }
    }
}

fn filter_by_zone<T: Clone>(items: &[T], zone: Option<&str>, zone_of: impl Fn(&T) -> Option<&str>) -> Vec<T> {
    match zone {
        Some(zone) => items.iter().filter(|i| zone_of(i) == Some(zone)).cloned().collect(),
        None => items.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use serde_json::json;
    use zonewatch_devkit::{fixtures, fixtures::ProblemBuilder, BackendStub};

    async fn context(stub: &BackendStub, variants: &[DashboardVariant]) -> AppContext {
        let cfg = BackendConfig { base_url: stub.base_url(), token: None, timeout_secs: 5 };
        let client = Arc::new(ApiClient::new(&cfg, Duration::from_secs(300)).unwrap());
        AppContext::new(client, Arc::new(KeyValueStore::ephemeral()), variants, HealthTracker::new())
    }

    #[tokio::test]
    async fn test_inventory_and_zone_filtering() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_hosts(vec![
            fixtures::host("HOST-1", "web-01", "Retail", 35.0),
            fixtures::host("HOST-2", "db-01", "Finance", 80.0),
        ]);
        stub.set_services(vec![fixtures::service("SVC-1", "checkout", "Retail", 120.0)]);
        stub.set_process_groups(vec![fixtures::process_group("PG-1", "tomcat", "Retail")]);
        stub.set_summary(json!({"active_problems": 2, "hosts": 2, "services": 1}));
        let ctx = context(&stub, &[DashboardVariant::Unified]).await;

        ctx.refresh_inventory(None, false).await;
        assert_eq!(ctx.hosts(None).len(), 2);
        assert_eq!(ctx.hosts(Some("Finance"))[0].name, "db-01");
        assert_eq!(ctx.services(Some("Retail")).len(), 1);
        assert!(ctx.process_groups(Some("Finance")).is_empty());
        assert_eq!(ctx.summary().unwrap().hosts, 2);
        assert!(ctx.system_health().inventory_errors.is_empty());
    }

    #[tokio::test]
    async fn test_failed_inventory_keeps_previous_lists() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_hosts(vec![fixtures::host("HOST-1", "web-01", "Retail", 35.0)]);
        let ctx = context(&stub, &[DashboardVariant::Unified]).await;
        ctx.refresh_inventory(None, false).await;

        stub.set_failing(true);
        ctx.refresh_inventory(None, true).await;
        assert_eq!(ctx.hosts(None).len(), 1);

        let health = ctx.system_health();
        assert!(health.inventory_errors.contains_key("hosts"));
        assert_eq!(health.backend_calls, 10);
        assert_eq!(health.cached_responses, 5);
        assert_eq!(health.stored_snapshots, 0);
    }

    #[tokio::test]
    async fn test_zone_health_from_dashboard_problems() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_zones(vec![
            fixtures::zone("MZ-1", "Retail", None),
            fixtures::zone("MZ-2", "Finance", Some(7)),
            fixtures::zone("MZ-3", "Quiet", None),
        ]);
        stub.set_active_problems(vec![
            ProblemBuilder::new("P-1").zone("Retail").open().build(),
            ProblemBuilder::new("P-2").zone("Retail").open().build(),
        ]);
        let ctx = context(&stub, &[DashboardVariant::Unified, DashboardVariant::Vfg]).await;
        ctx.dashboard(DashboardVariant::Unified).unwrap().initialize().await;
        ctx.refresh_inventory(None, false).await;

        let zones = ctx.zones();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[0].problem_count, 2);
        assert_eq!(zones[0].health, ZoneHealth::Warning);
        assert_eq!(zones[1].health, ZoneHealth::Critical);
        assert_eq!(zones[2].health, ZoneHealth::Healthy);
        assert_eq!(ctx.zone("Finance").unwrap().id, "MZ-2");
        assert!(ctx.zone("nowhere").is_none());

        let variants: Vec<_> = ctx.dashboards().iter().map(|d| d.variant()).collect();
        assert_eq!(variants, vec![DashboardVariant::Vfg, DashboardVariant::Unified]);
        ctx.shutdown();
        assert!(ctx.dashboard(DashboardVariant::Vfg).unwrap().is_closed());
    }
}
