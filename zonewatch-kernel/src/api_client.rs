/**
 * BACKEND API CLIENT - Cached, deduplicated access to the monitoring backend
 *
 * ROLE :
 * Single entry point for every call the kernel makes to the backend
 * (/problems, /hosts, /services, /processes, /summary, /management-zones).
 *
 * HOW IT WORKS :
 * - Responses are cached per key (endpoint + sorted query params) for `ttl`
 * - Concurrent identical GETs share one in-flight future: one round trip
 * - The in-flight future fills the cache and clears its pending slot itself,
 *   so the work completes even if the caller that started it goes away
 * - Failures never propagate as Err: callers get `ApiResponse { data, error }`
 */

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::models::{
    DashboardVariant, Host, ProcessGroup, RawManagementZone, Service, Summary, Timeframe,
};

pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("backend unreachable: {0}")]
    Network(String),
    #[error("backend answered HTTP {0}")]
    Http(u16),
    #[error("unreadable backend response: {0}")]
    Decode(String),
}

/// Outcome of a backend call: exactly one of `data` / `error` is set.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data: Some(data), error: None }
    }

    pub fn err(error: ApiError) -> Self {
        Self { data: None, error: Some(error) }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(ApiError::Decode("empty response".into())),
        }
    }
}

type FetchResult = Result<Arc<Value>, ApiError>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

struct CacheEntry {
    data: Arc<Value>,
    stored_at: Instant,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    ttl: Duration,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    pending: Arc<Mutex<HashMap<String, InFlight>>>,
    network_calls: AtomicU64,
}

impl ApiClient {
    pub fn new(config: &BackendConfig, ttl: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("zonewatch-kernel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            network_calls: AtomicU64::new(0),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of requests actually sent to the backend.
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        debug!("response cache cleared");
    }

    /// GET with TTL cache and in-flight deduplication.
    /// `use_cache = false` skips the cache read but still joins an identical in-flight call.
    pub async fn get(&self, endpoint: &str, params: &QueryParams, use_cache: bool) -> ApiResponse<Value> {
        let key = cache_key(endpoint, params);

        if use_cache {
            if let Some(data) = self.cached(&key) {
                debug!("cache hit {key}");
                return ApiResponse::ok((*data).clone());
            }
        }

        let in_flight = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(existing) => {
                    debug!("joining in-flight request {key}");
                    existing.clone()
                }
                None => {
                    let fut = self.start_request(key.clone(), endpoint, params);
                    pending.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        match in_flight.await {
            Ok(data) => ApiResponse::ok((*data).clone()),
            Err(e) => {
                warn!("GET {key} failed: {e}");
                ApiResponse::err(e)
            }
        }
    }

    /// Typed GET. Accepts bare payloads as well as `{"data": ...}` envelopes.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        use_cache: bool,
    ) -> ApiResponse<T> {
        let response = self.get(endpoint, params, use_cache).await;
        match response.into_result() {
            Ok(value) => match serde_json::from_value(unwrap_envelope(value)) {
                Ok(data) => ApiResponse::ok(data),
                Err(e) => {
                    warn!("GET {endpoint}: {e}");
                    ApiResponse::err(ApiError::Decode(e.to_string()))
                }
            },
            Err(e) => ApiResponse::err(e),
        }
    }

    /// POST, never cached nor deduplicated.
    pub async fn post(&self, endpoint: &str, body: &Value) -> ApiResponse<Value> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let request = self.authorize(self.http.post(self.url(endpoint)).json(body));
        match send_json(request).await {
            Ok(data) => ApiResponse::ok((*data).clone()),
            Err(e) => {
                warn!("POST {endpoint} failed: {e}");
                ApiResponse::err(e)
            }
        }
    }

    // ============ TYPED ENDPOINTS ============

    /// Raw problem records, left undecoded so one bad record can be skipped.
    pub async fn problems(&self, query: &ProblemQuery, use_cache: bool) -> ApiResponse<Vec<Value>> {
        self.get_as("/problems", &query.to_params(), use_cache).await
    }

    pub async fn hosts(&self, zone: Option<&str>, use_cache: bool) -> ApiResponse<Vec<Host>> {
        self.get_as("/hosts", &zone_params(zone), use_cache).await
    }

    pub async fn services(&self, zone: Option<&str>, use_cache: bool) -> ApiResponse<Vec<Service>> {
        self.get_as("/services", &zone_params(zone), use_cache).await
    }

    pub async fn process_groups(&self, zone: Option<&str>, use_cache: bool) -> ApiResponse<Vec<ProcessGroup>> {
        self.get_as("/processes", &zone_params(zone), use_cache).await
    }

    pub async fn summary(&self, use_cache: bool) -> ApiResponse<Summary> {
        self.get_as("/summary", &QueryParams::new(), use_cache).await
    }

    pub async fn management_zones(&self, use_cache: bool) -> ApiResponse<Vec<RawManagementZone>> {
        self.get_as("/management-zones", &QueryParams::new(), use_cache).await
    }

    /// Asks the backend to drop its own caches.
    pub async fn request_backend_reload(&self) -> ApiResponse<Value> {
        self.post("/refresh", &serde_json::json!({ "scope": "all" })).await
    }

    fn cached(&self, key: &str) -> Option<Arc<Value>> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(Arc::clone(&entry.data)),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn start_request(&self, key: String, endpoint: &str, params: &QueryParams) -> InFlight {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        debug!("GET {key}");

        let request = self.authorize(self.http.get(self.url(endpoint)).query(params));
        let cache = Arc::clone(&self.cache);
        let pending = Arc::clone(&self.pending);

        async move {
            let result = send_json(request).await;
            if let Ok(data) = &result {
                cache.lock().insert(
                    key.clone(),
                    CacheEntry { data: Arc::clone(data), stored_at: Instant::now() },
                );
            }
            pending.lock().remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

/// Parameters of a `/problems` query.
#[derive(Debug, Clone, Default)]
pub struct ProblemQuery {
    pub variant: Option<DashboardVariant>,
    pub open_only: bool,
    pub timeframe: Option<Timeframe>,
    pub zone: Option<String>,
    pub debug: bool,
}

impl ProblemQuery {
    pub fn to_params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params.insert("status".into(), if self.open_only { "open" } else { "all" }.into());
        if let Some(kind) = self.variant.and_then(|v| v.backend_type()) {
            params.insert("type".into(), kind.into());
        }
        if let Some(timeframe) = self.timeframe {
            params.insert("from".into(), timeframe.as_param().into());
        }
        if let Some(zone) = &self.zone {
            params.insert("zone".into(), zone.clone());
        }
        if self.debug {
            params.insert("debug".into(), "true".into());
        }
        params
    }
}

fn zone_params(zone: Option<&str>) -> QueryParams {
    let mut params = QueryParams::new();
    if let Some(zone) = zone {
        params.insert("zone".into(), zone.to_string());
    }
    params
}

/// "endpoint?k1=v1&k2=v2" with keys in sorted order.
pub fn cache_key(endpoint: &str, params: &QueryParams) -> String {
    let endpoint = format!("/{}", endpoint.trim_start_matches('/'));
    if params.is_empty() {
        return endpoint;
    }
    let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{endpoint}?{}", query.join("&"))
}

fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

async fn send_json(request: RequestBuilder) -> FetchResult {
    let resp = request.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Http(status.as_u16()));
    }
    let value = resp
        .json::<Value>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(Arc::new(value))
}
