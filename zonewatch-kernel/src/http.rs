/**
 * REST API - HTTP surface of the zonewatch kernel
 *
 * ROLE :
 * Serves the aggregated monitoring state (zones, inventory, dashboards) to
 * front-ends and scripts, plus filter/preference storage and CSV exports.
 *
 * HOW IT WORKS :
 * - Axum router, JSON responses, plain status codes on errors (400, 401, 404, 500)
 * - Reads go to the AppContext snapshot, never straight to the backend
 * - POST /dashboards/{variant}/refresh is the only route that can trigger fetches
 *
 * SECURITY :
 * - x-api-key header required on every route except /health*
 * - No configured key means every protected route is refused
 */

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::context::{AppContext, SystemHealth};
use crate::dashboard::{DashboardState, RefreshOutcome};
use crate::export::{export_file_name, export_hosts_to_csv, export_problems_to_csv};
use crate::filters::{FilterItem, FilterSet, ZoneFilterPrefs};
use crate::models::{
    DashboardVariant, Host, ManagementZone, Problem, ProcessGroup, Service, Summary, Timeframe,
};
use crate::preferences::Preferences;
use crate::storage::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub api_key: Option<Arc<str>>,
}

async fn require_api_key(
    State(expected): State<Option<Arc<str>>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let Some(expected) = expected.filter(|k| !k.is_empty()) else {
        warn!("SECURITY: no API key configured, refusing {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == &*expected);

    if !ok {
        warn!("rejected request to {} (bad or missing x-api-key)", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let api_key = app_state.api_key.clone();
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/summary", get(get_summary))
        .route("/zones", get(list_zones))
        .route("/zones/{id}", get(get_zone))
        .route("/hosts", get(list_hosts))
        .route("/hosts/export.csv", get(export_hosts))
        .route("/services", get(list_services))
        .route("/processes", get(list_processes))
        .route("/dashboards", get(list_dashboards))
        .route("/dashboards/{variant}", get(get_dashboard))
        .route("/dashboards/{variant}/refresh", post(refresh_dashboard))
        .route("/dashboards/{variant}/export.csv", get(export_dashboard))
        .route(
            "/filters/zones",
            get(get_zone_filters).put(put_zone_filters).delete(clear_zone_filters),
        )
        .route("/filters/zones/toggle", post(toggle_zone_filter))
        .route("/filters/zones/{category}", delete(clear_zone_filter_category))
        .route("/preferences", get(get_preferences).put(put_preferences))
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(api_key, require_api_key))
}

#[derive(Debug, Default, Deserialize)]
struct ZoneParam {
    zone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZonesParams {
    /// Apply the saved management-zone filters and search text.
    #[serde(default)]
    filtered: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshParams {
    #[serde(default)]
    force: bool,
    timeframe: Option<String>,
    #[serde(default)]
    reload: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExportParams {
    zone: Option<String>,
    impact: Option<String>,
    status: Option<String>,
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<SystemHealth> {
    Json(app.ctx.system_health())
}

// GET /summary
async fn get_summary(State(app): State<AppState>) -> Json<Summary> {
    Json(app.ctx.summary().unwrap_or_default())
}

// GET /zones?filtered=
async fn list_zones(
    State(app): State<AppState>,
    Query(params): Query<ZonesParams>,
) -> Json<Vec<ManagementZone>> {
    let mut zones = app.ctx.zones();
    if params.filtered {
        let prefs = ZoneFilterPrefs::load(&app.ctx.store);
        if prefs.is_active() {
            zones.retain(|z| prefs.matches_zone(&z.name));
        }
    }
    Json(zones)
}

// GET /zones/{id}
async fn get_zone(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ManagementZone>, StatusCode> {
    app.ctx.zone(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /hosts?zone=
async fn list_hosts(State(app): State<AppState>, Query(p): Query<ZoneParam>) -> Json<Vec<Host>> {
    Json(app.ctx.hosts(p.zone.as_deref()))
}

// GET /services?zone=
async fn list_services(State(app): State<AppState>, Query(p): Query<ZoneParam>) -> Json<Vec<Service>> {
    Json(app.ctx.services(p.zone.as_deref()))
}

// GET /processes?zone=
async fn list_processes(
    State(app): State<AppState>,
    Query(p): Query<ZoneParam>,
) -> Json<Vec<ProcessGroup>> {
    Json(app.ctx.process_groups(p.zone.as_deref()))
}

// GET /hosts/export.csv?zone=
async fn export_hosts(State(app): State<AppState>, Query(p): Query<ZoneParam>) -> Response {
    let hosts = app.ctx.hosts(p.zone.as_deref());
    let now = OffsetDateTime::now_utc();
    let title = match &p.zone {
        Some(zone) => format!("Hosts - {zone}"),
        None => "Hosts - all zones".to_string(),
    };
    match export_hosts_to_csv(&hosts, &title, now) {
        Ok(csv) => csv_response(csv, export_file_name("hosts", now)),
        Err(e) => {
            error!("hosts export failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// GET /dashboards
async fn list_dashboards(State(app): State<AppState>) -> Json<Vec<DashboardState>> {
    Json(app.ctx.dashboards().iter().map(|d| d.state()).collect())
}

// GET /dashboards/{variant}
async fn get_dashboard(
    State(app): State<AppState>,
    Path(variant): Path<String>,
) -> Result<Json<DashboardState>, StatusCode> {
    let variant = parse_variant(&variant)?;
    let dashboard = app.ctx.dashboard(variant).ok_or(StatusCode::NOT_FOUND)?;
    remember_tab(&app, variant);
    Ok(Json(dashboard.state()))
}

// POST /dashboards/{variant}/refresh?force=&timeframe=&reload=
async fn refresh_dashboard(
    State(app): State<AppState>,
    Path(variant): Path<String>,
    Query(params): Query<RefreshParams>,
) -> Result<Json<RefreshOutcome>, StatusCode> {
    let variant = parse_variant(&variant)?;
    let timeframe = params
        .timeframe
        .as_deref()
        .map(str::parse::<Timeframe>)
        .transpose()
        .map_err(|e| {
            warn!("refresh {variant}: {e}");
            StatusCode::BAD_REQUEST
        })?;
    let dashboard = app.ctx.dashboard(variant).ok_or(StatusCode::NOT_FOUND)?;

    let outcome = dashboard.refresh_data(params.force, timeframe, params.reload).await;
    info!("[{variant}] refresh requested (force={}, reload={}): {outcome:?}", params.force, params.reload);

    if let Some(timeframe) = timeframe {
        let mut prefs = Preferences::load(&app.ctx.store, &app.ctx.session);
        prefs.session.last_timeframe = Some(timeframe);
        if let Err(e) = prefs.session.save(&app.ctx.session) {
            warn!("could not remember timeframe: {e}");
        }
    }
    if params.reload {
        app.ctx.refresh_inventory(None, true).await;
    }
    Ok(Json(outcome))
}

// GET /dashboards/{variant}/export.csv?zone=&impact=&status=
async fn export_dashboard(
    State(app): State<AppState>,
    Path(variant): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, StatusCode> {
    let variant = parse_variant(&variant)?;
    let dashboard = app.ctx.dashboard(variant).ok_or(StatusCode::NOT_FOUND)?;

    let mut filters = FilterSet::new();
    if let Some(zone) = params.zone.as_deref().filter(|v| !v.is_empty()) {
        filters.select_only("zone", zone);
    }
    // impact and status labels are lowercase
    for (category, value) in [("impact", &params.impact), ("status", &params.status)] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            filters.select_only(category, &value.to_ascii_lowercase());
        }
    }

    let problems = filters.apply(&dashboard_problems(&dashboard.state()));
    let now = OffsetDateTime::now_utc();
    let title = format!("{} problems ({})", variant.slug().to_uppercase(), dashboard.state().timeframe.as_param());
    let csv = export_problems_to_csv(&problems, &title, now).map_err(|e| {
        error!("[{variant}] export failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(csv_response(csv, export_file_name(&format!("problems_{variant}"), now)))
}

// GET /filters/zones
async fn get_zone_filters(State(app): State<AppState>) -> Json<ZoneFilterPrefs> {
    Json(ZoneFilterPrefs::load(&app.ctx.store))
}

// PUT /filters/zones
async fn put_zone_filters(
    State(app): State<AppState>,
    Json(prefs): Json<ZoneFilterPrefs>,
) -> Result<Json<ZoneFilterPrefs>, StatusCode> {
    prefs.save(&app.ctx.store).map_err(store_failure)?;
    Ok(Json(prefs))
}

// POST /filters/zones/toggle
async fn toggle_zone_filter(
    State(app): State<AppState>,
    Json(item): Json<FilterItem>,
) -> Result<Json<ZoneFilterPrefs>, StatusCode> {
    let mut prefs = ZoneFilterPrefs::load(&app.ctx.store);
    prefs.toggle(&item.category, &item.value);
    prefs.save(&app.ctx.store).map_err(store_failure)?;
    Ok(Json(prefs))
}

// DELETE /filters/zones
async fn clear_zone_filters(State(app): State<AppState>) -> Result<Json<ZoneFilterPrefs>, StatusCode> {
    let mut prefs = ZoneFilterPrefs::load(&app.ctx.store);
    prefs.clear_all();
    prefs.save(&app.ctx.store).map_err(store_failure)?;
    Ok(Json(prefs))
}

// DELETE /filters/zones/{category}
async fn clear_zone_filter_category(
    State(app): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<ZoneFilterPrefs>, StatusCode> {
    let mut prefs = ZoneFilterPrefs::load(&app.ctx.store);
    prefs.clear_category(&category);
    prefs.save(&app.ctx.store).map_err(store_failure)?;
    Ok(Json(prefs))
}

// GET /preferences
async fn get_preferences(State(app): State<AppState>) -> Json<Preferences> {
    Json(Preferences::load(&app.ctx.store, &app.ctx.session))
}

// PUT /preferences
async fn put_preferences(
    State(app): State<AppState>,
    Json(prefs): Json<Preferences>,
) -> Result<Json<Preferences>, StatusCode> {
    prefs.save(&app.ctx.store, &app.ctx.session).map_err(store_failure)?;
    Ok(Json(prefs))
}

fn parse_variant(raw: &str) -> Result<DashboardVariant, StatusCode> {
    raw.parse().map_err(|_| StatusCode::NOT_FOUND)
}

fn remember_tab(app: &AppState, variant: DashboardVariant) {
    let mut prefs = Preferences::load(&app.ctx.store, &app.ctx.session);
    prefs.session.last_active_tab = Some(variant);
    if let Err(e) = prefs.session.save(&app.ctx.session) {
        warn!("could not remember active tab: {e}");
    }
}

/// Active problems first, then recent ones not already listed.
fn dashboard_problems(state: &DashboardState) -> Vec<Problem> {
    let mut seen = HashSet::new();
    state
        .active_problems
        .iter()
        .chain(state.recent_problems.iter())
        .filter(|p| seen.insert(p.id.clone()))
        .cloned()
        .collect()
}

fn csv_response(body: String, file_name: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    )
        .into_response()
}

fn store_failure(e: StoreError) -> StatusCode {
    error!("store write failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::ApiClient;
    use crate::config::BackendConfig;
    use crate::health::HealthTracker;
    use crate::storage::KeyValueStore;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use zonewatch_devkit::{fixtures, fixtures::ProblemBuilder, BackendStub};

    const KEY: &str = "test-key";

    async fn serve(stub: &BackendStub, api_key: Option<&str>) -> (String, Arc<AppContext>) {
        let cfg = BackendConfig { base_url: stub.base_url(), token: None, timeout_secs: 5 };
        let client = Arc::new(ApiClient::new(&cfg, Duration::from_secs(300)).unwrap());
        let ctx = Arc::new(AppContext::new(
            client,
            Arc::new(KeyValueStore::ephemeral()),
            &[DashboardVariant::Vfg, DashboardVariant::Unified],
            HealthTracker::new(),
        ));
        let router = build_router(AppState { ctx: Arc::clone(&ctx), api_key: api_key.map(Arc::from) });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}"), ctx)
    }

    fn http() -> reqwest::Client {
        reqwest::Client::new()
    }

    async fn filtered_zone_names(base: &str) -> Vec<String> {
        let zones: Vec<Value> = http()
            .get(format!("{base}/zones?filtered=true"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        zones.iter().map(|z| z["name"].as_str().unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn test_api_key_guard() {
        let stub = BackendStub::start().await.unwrap();
        let (base, _ctx) = serve(&stub, Some(KEY)).await;

        let health = http().get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");

        let denied = http().get(format!("{base}/zones")).send().await.unwrap();
        assert_eq!(denied.status(), 401);
        let wrong = http().get(format!("{base}/zones")).header("x-api-key", "nope").send().await.unwrap();
        assert_eq!(wrong.status(), 401);
        let allowed = http().get(format!("{base}/zones")).header("x-api-key", KEY).send().await.unwrap();
        assert_eq!(allowed.status(), 200);

        let (open_base, _ctx) = serve(&stub, None).await;
        let refused = http().get(format!("{open_base}/summary")).header("x-api-key", "").send().await.unwrap();
        assert_eq!(refused.status(), 401);
        let system = http().get(format!("{open_base}/health")).send().await.unwrap();
        assert_eq!(system.status(), 200);
    }

    #[tokio::test]
    async fn test_refresh_and_export_dashboard() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_active_problems(vec![
            ProblemBuilder::new("P-1").zone("Retail").open().build(),
            ProblemBuilder::new("P-2").zone("Finance").open().build(),
        ]);
        let (base, _ctx) = serve(&stub, Some(KEY)).await;

        let outcome: Value = http()
            .post(format!("{base}/dashboards/vfg/refresh?force=true&timeframe=-7d"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome["outcome"], "fetched");
        assert_eq!(outcome["active"], 2);

        let state: Value = http()
            .get(format!("{base}/dashboards/vfg"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state["timeframe"], "-7d");
        assert_eq!(state["active_problems"].as_array().unwrap().len(), 2);

        let export = http()
            .get(format!("{base}/dashboards/vfg/export.csv?zone=Retail"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(export.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert!(export.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().contains("problems_vfg_"));
        let body = export.text().await.unwrap();
        assert!(body.contains("\"P-1\""));
        assert!(!body.contains("\"P-2\""));

        let prefs: Value = http()
            .get(format!("{base}/preferences"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(prefs["last_timeframe"], "-7d");
        assert_eq!(prefs["last_active_tab"], "vfg");

        let missing = http().get(format!("{base}/dashboards/vfe")).header("x-api-key", KEY).send().await.unwrap();
        assert_eq!(missing.status(), 404);
        let bad = http()
            .post(format!("{base}/dashboards/vfg/refresh?timeframe=-1y"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);
    }

    #[tokio::test]
    async fn test_inventory_routes_and_zone_filters() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_hosts(vec![
            fixtures::host("HOST-1", "web-01", "Retail-EU", 35.0),
            fixtures::host("HOST-2", "db-01", "Retail-US", 80.0),
        ]);
        stub.set_zones(vec![
            fixtures::zone("MZ-1", "Retail-EU", Some(0)),
            fixtures::zone("MZ-2", "Retail-US", Some(2)),
        ]);
        let (base, ctx) = serve(&stub, Some(KEY)).await;
        ctx.refresh_inventory(None, false).await;

        let hosts: Vec<Value> = http()
            .get(format!("{base}/hosts?zone=Retail-US"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0]["name"], "db-01");

        let csv = http()
            .get(format!("{base}/hosts/export.csv"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(csv.contains("\"web-01\"") && csv.contains("\"db-01\""));

        let saved = http()
            .put(format!("{base}/filters/zones"))
            .header("x-api-key", KEY)
            .json(&json!({"filters": [], "search": "us"}))
            .send()
            .await
            .unwrap();
        assert_eq!(saved.status(), 200);

        let zones: Vec<Value> = http()
            .get(format!("{base}/zones?filtered=true"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0]["health"], "warning");

        let zone = http().get(format!("{base}/zones/MZ-9")).header("x-api-key", KEY).send().await.unwrap();
        assert_eq!(zone.status(), 404);
    }

    #[tokio::test]
    async fn test_zone_filter_toggle_and_clear_routes() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_zones(vec![
            fixtures::zone("MZ-1", "Retail-EU", Some(0)),
            fixtures::zone("MZ-2", "Retail-US", Some(2)),
            fixtures::zone("MZ-3", "Finance", Some(5)),
        ]);
        let (base, ctx) = serve(&stub, Some(KEY)).await;
        ctx.refresh_inventory(None, false).await;

        assert_eq!(filtered_zone_names(&base).await.len(), 3);

        for value in ["Retail-EU", "Finance", "Finance"] {
            let toggled = http()
                .post(format!("{base}/filters/zones/toggle"))
                .header("x-api-key", KEY)
                .json(&json!({"category": "zone", "value": value}))
                .send()
                .await
                .unwrap();
            assert_eq!(toggled.status(), 200);
        }
        assert_eq!(filtered_zone_names(&base).await, vec!["Retail-EU"]);

        let prefs: Value = http()
            .delete(format!("{base}/filters/zones/zone"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(prefs["filters"].as_array().unwrap().is_empty());
        assert_eq!(filtered_zone_names(&base).await.len(), 3);

        http()
            .put(format!("{base}/filters/zones"))
            .header("x-api-key", KEY)
            .json(&json!({"filters": [{"category": "zone", "value": "Finance"}], "search": "fin"}))
            .send()
            .await
            .unwrap();
        assert_eq!(filtered_zone_names(&base).await, vec!["Finance"]);
        let cleared: Value = http()
            .delete(format!("{base}/filters/zones"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cleared, json!({"filters": [], "search": ""}));
        assert_eq!(filtered_zone_names(&base).await.len(), 3);
    }

    #[tokio::test]
    async fn test_system_health_reports_backend_traffic() {
        let stub = BackendStub::start().await.unwrap();
        stub.set_active_problems(vec![ProblemBuilder::new("P-1").zone("Retail").open().build()]);
        let (base, ctx) = serve(&stub, Some(KEY)).await;
        ctx.dashboard(DashboardVariant::Vfg).unwrap().initialize().await;

        let health: Value = http()
            .get(format!("{base}/system/health"))
            .header("x-api-key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["dashboards_tracked"], 2);
        assert_eq!(health["backend_status"], "available");
        assert_eq!(health["backend_calls"], 2);
        assert_eq!(health["cached_responses"], 2);
        assert_eq!(health["stored_snapshots"], 1);
        assert!(health["inventory_errors"].as_object().unwrap().is_empty());
    }
}
