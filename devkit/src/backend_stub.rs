/*!
Stub monitoring backend for tests without a real tenant

Serves the backend REST routes (`/problems`, `/hosts`, `/services`,
`/processes`, `/summary`, `/management-zones`, `POST /refresh`) on an
ephemeral local port. Records every call and its query so tests can assert
on network traffic, and can inject latency, failures and flaky empty
answers.
*/

use anyhow::Result;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type QueryMap = HashMap<String, String>;

#[derive(Default)]
struct StubData {
    calls: HashMap<String, usize>,
    queries: HashMap<String, Vec<QueryMap>>,
    latency: Duration,
    failing: bool,
    flaky_empty: usize,
    active_problems: Vec<Value>,
    recent_problems: Vec<Value>,
    hosts: Vec<Value>,
    services: Vec<Value>,
    process_groups: Vec<Value>,
    zones: Vec<Value>,
    summary: Option<Value>,
}

type StubState = Arc<Mutex<StubData>>;

/// Backend stub bound to `127.0.0.1:<random>`. Stops when dropped.
pub struct BackendStub {
    addr: SocketAddr,
    data: StubState,
    server: JoinHandle<()>,
}

impl BackendStub {
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok();

        let data: StubState = Arc::new(Mutex::new(StubData::default()));
        let app = Router::new()
            .route("/problems", get(problems))
            .route("/hosts", get(hosts))
            .route("/services", get(services))
            .route("/processes", get(process_groups))
            .route("/summary", get(summary))
            .route("/management-zones", get(zones))
            .route("/refresh", post(refresh))
            .layer(middleware::from_fn_with_state(data.clone(), record))
            .with_state(data.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[stub] server stopped: {}", e);
            }
        });
        log::info!("[stub] backend listening on http://{}", addr);

        Ok(Self { addr, data, server })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received on `path` so far.
    pub fn calls(&self, path: &str) -> usize {
        self.data.lock().calls.get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.data.lock().calls.values().sum()
    }

    pub fn last_query(&self, path: &str) -> Option<QueryMap> {
        self.data.lock().queries.get(path)?.last().cloned()
    }

    /// Most recent query on `path` whose `key` parameter equals `value`.
    pub fn last_query_matching(&self, path: &str, key: &str, value: &str) -> Option<QueryMap> {
        self.data
            .lock()
            .queries
            .get(path)?
            .iter()
            .rev()
            .find(|q| q.get(key).map(String::as_str) == Some(value))
            .cloned()
    }

    pub fn set_latency(&self, latency: Duration) {
        self.data.lock().latency = latency;
    }

    /// While set, every route answers 503.
    pub fn set_failing(&self, failing: bool) {
        self.data.lock().failing = failing;
    }

    /// Served for `status=open` queries.
    pub fn set_active_problems(&self, problems: Vec<Value>) {
        self.data.lock().active_problems = problems;
    }

    /// Served for every other `/problems` query.
    pub fn set_recent_problems(&self, problems: Vec<Value>) {
        self.data.lock().recent_problems = problems;
    }

    /// The next `count` open-problem queries answer an empty list.
    pub fn set_flaky_empty(&self, count: usize) {
        self.data.lock().flaky_empty = count;
    }

    pub fn set_hosts(&self, hosts: Vec<Value>) {
        self.data.lock().hosts = hosts;
    }

    pub fn set_services(&self, services: Vec<Value>) {
        self.data.lock().services = services;
    }

    pub fn set_process_groups(&self, groups: Vec<Value>) {
        self.data.lock().process_groups = groups;
    }

    pub fn set_zones(&self, zones: Vec<Value>) {
        self.data.lock().zones = zones;
    }

    /// Replaces the computed summary with a fixed body.
    pub fn set_summary(&self, summary: Value) {
        self.data.lock().summary = Some(summary);
    }

    pub fn reset_calls(&self) {
        let mut data = self.data.lock();
        data.calls.clear();
        data.queries.clear();
    }
}

impl Drop for BackendStub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn record(State(data): State<StubState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let query = Query::<QueryMap>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let (latency, failing) = {
        let mut data = data.lock();
        *data.calls.entry(path.clone()).or_insert(0) += 1;
        data.queries.entry(path.clone()).or_default().push(query);
        (data.latency, data.failing)
    };
    log::debug!("[stub] {} {}", req.method(), req.uri());

    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    if failing {
        log::warn!("[stub] failing {}", path);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    next.run(req).await
}

fn in_zone(items: &[Value], zone: Option<&String>) -> Vec<Value> {
    items
        .iter()
        .filter(|item| zone.map_or(true, |z| item["zone"].as_str() == Some(z.as_str())))
        .cloned()
        .collect()
}

async fn problems(State(data): State<StubState>, Query(q): Query<QueryMap>) -> Json<Vec<Value>> {
    let mut data = data.lock();
    let open_only = q.get("status").map(String::as_str) == Some("open");
    if open_only && data.flaky_empty > 0 {
        data.flaky_empty -= 1;
        return Json(Vec::new());
    }
    let source = if open_only { &data.active_problems } else { &data.recent_problems };
    Json(in_zone(source, q.get("zone")))
}

async fn hosts(State(data): State<StubState>, Query(q): Query<QueryMap>) -> Json<Vec<Value>> {
    Json(in_zone(&data.lock().hosts, q.get("zone")))
}

async fn services(State(data): State<StubState>, Query(q): Query<QueryMap>) -> Json<Vec<Value>> {
    Json(in_zone(&data.lock().services, q.get("zone")))
}

async fn process_groups(State(data): State<StubState>, Query(q): Query<QueryMap>) -> Json<Vec<Value>> {
    Json(in_zone(&data.lock().process_groups, q.get("zone")))
}

async fn zones(State(data): State<StubState>) -> Json<Vec<Value>> {
    Json(data.lock().zones.clone())
}

async fn summary(State(data): State<StubState>) -> Json<Value> {
    let data = data.lock();
    let body = data.summary.clone().unwrap_or_else(|| {
        json!({
            "active_problems": data.active_problems.len(),
            "hosts": data.hosts.len(),
            "services": data.services.len(),
            "process_groups": data.process_groups.len(),
            "management_zones": data.zones.len(),
        })
    });
    Json(body)
}

async fn refresh() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
