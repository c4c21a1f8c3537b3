/**
 * DASHBOARD CACHE - Per-variant problem state with two cache levels
 *
 * ROLE :
 * Holds what one dashboard (VFG, VFE, unified) shows: active problems,
 * recent problems over a timeframe, loading flag, last error, last refresh.
 *
 * HOW IT WORKS :
 * - Level 1: persisted snapshot in the key-value store (survives restarts)
 * - Level 2: the API client's response cache
 * - A fresh snapshot (younger than the TTL, same timeframe) answers without network
 * - `force` bypasses both levels, `force_backend_reload` also wipes them
 *   and asks the backend to reload
 * - One refresh at a time: concurrent callers get `AlreadyRunning`
 * - An empty active list triggers one uncached re-query before being believed
 * - Failures keep the previous data on screen and raise the health banner
 * - The background refresher belongs to the cache: `close()` / drop stops it
 *   and late results are discarded
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api_client::{ApiClient, ProblemQuery};
use crate::health::HealthTracker;
use crate::models::{DashboardVariant, Problem, Timeframe};
use crate::state::{new_state, Shared};
use crate::storage::{KeyValueStore, DASHBOARD_KEY_PREFIX};
use crate::transform::transform_problems;

/// What gets persisted under `dashboard_<variant>_cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub active_problems: Vec<Problem>,
    pub recent_problems: Vec<Problem>,
    pub timeframe: Timeframe,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub variant: DashboardVariant,
    pub active_problems: Vec<Problem>,
    pub recent_problems: Vec<Problem>,
    pub loading: bool,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub timeframe: Timeframe,
    /// True while the data on display came from the persisted snapshot.
    pub from_cache: bool,
}

impl DashboardState {
    fn empty(variant: DashboardVariant) -> Self {
        Self {
            variant,
            active_problems: Vec::new(),
            recent_problems: Vec::new(),
            loading: false,
            error: None,
            last_refresh: None,
            timeframe: Timeframe::default(),
            from_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    FromCache,
    Fetched { active: usize, recent: usize },
    AlreadyRunning,
    Failed { error: String },
    /// The cache was closed while the refresh was in flight.
    Discarded,
}

/// Clears the pending flag however the refresh future ends (including abort).
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DashboardCache {
    variant: DashboardVariant,
    client: Arc<ApiClient>,
    store: Arc<KeyValueStore>,
    ttl: Duration,
    health: Option<HealthTracker>,
    state: Shared<DashboardState>,
    refreshing: AtomicBool,
    closed: AtomicBool,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl DashboardCache {
    pub fn new(
        variant: DashboardVariant,
        client: Arc<ApiClient>,
        store: Arc<KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            variant,
            client,
            store,
            ttl,
            health: None,
            state: new_state(DashboardState::empty(variant)),
            refreshing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            refresher: Mutex::new(None),
        }
    }

    pub fn with_health_tracker(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn variant(&self) -> DashboardVariant {
        self.variant
    }

    pub fn state(&self) -> DashboardState {
        self.state.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// First load: adopt the persisted snapshot's timeframe, then serve it if
    /// still fresh or fetch otherwise.
    pub async fn initialize(&self) -> RefreshOutcome {
        if let Some(snapshot) = self.stored_snapshot() {
            self.state.lock().timeframe = snapshot.timeframe;
        }
        self.refresh_data(false, None, false).await
    }

    pub async fn refresh_data(
        &self,
        force: bool,
        timeframe: Option<Timeframe>,
        force_backend_reload: bool,
    ) -> RefreshOutcome {
        if self.is_closed() {
            return RefreshOutcome::Discarded;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] refresh already running", self.variant);
            return RefreshOutcome::AlreadyRunning;
        }
        let _pending = PendingGuard(&self.refreshing);

        let timeframe = timeframe.unwrap_or_else(|| self.state.lock().timeframe);
        let force = force || force_backend_reload;

        if !force {
            if let Some(snapshot) = self.fresh_snapshot(timeframe) {
                debug!("[{}] serving persisted snapshot from {}", self.variant, snapshot.saved_at);
                self.apply_snapshot(snapshot);
                return RefreshOutcome::FromCache;
            }
        }

        if force_backend_reload {
            self.purge_caches().await;
        }

        self.state.lock().loading = true;
        self.fetch(timeframe, !force).await
    }

    /// Periodic forced refetch. The first tick fires after `every`, not immediately.
    pub fn spawn_background_refresh(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let variant = self.variant;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                if cache.is_closed() {
                    break;
                }
                let outcome = cache.refresh_data(true, None, false).await;
                debug!("[{variant}] background refresh: {outcome:?}");
            }
        });

        if let Some(previous) = self.refresher.lock().replace(handle) {
            previous.abort();
        }
        info!("[{}] background refresh every {:?}", self.variant, every);
    }

    /// Stops the background refresher; results of in-flight refreshes are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.refresher.lock().take() {
            handle.abort();
        }
    }

    async fn fetch(&self, timeframe: Timeframe, use_cache: bool) -> RefreshOutcome {
        let active_query = ProblemQuery {
            variant: Some(self.variant),
            open_only: true,
            ..Default::default()
        };
        let recent_query = ProblemQuery {
            variant: Some(self.variant),
            open_only: false,
            timeframe: Some(timeframe),
            ..Default::default()
        };

        let (active, recent) = tokio::join!(
            self.client.problems(&active_query, use_cache),
            self.client.problems(&recent_query, use_cache),
        );
        if self.is_closed() {
            return self.discard();
        }

        let mut active_raw = match active.into_result() {
            Ok(records) => records,
            Err(e) => return self.fail(e.to_string()),
        };
        let recent_raw = match recent.into_result() {
            Ok(records) => records,
            Err(e) => return self.fail(e.to_string()),
        };

        if active_raw.is_empty() {
            info!("[{}] backend reports zero active problems, double-checking", self.variant);
            let recheck = ProblemQuery { debug: true, ..active_query };
            active_raw = match self.client.problems(&recheck, false).await.into_result() {
                Ok(records) => records,
                Err(e) => return self.fail(e.to_string()),
            };
            if self.is_closed() {
                return self.discard();
            }
        }

        let now = OffsetDateTime::now_utc();
        let (active_problems, skipped_active) = transform_problems(&active_raw, now);
        let (recent_problems, skipped_recent) = transform_problems(&recent_raw, now);
        if skipped_active + skipped_recent > 0 {
            warn!(
                "[{}] skipped {} undecodable problem records",
                self.variant,
                skipped_active + skipped_recent
            );
        }
        if active_problems.is_empty() && skipped_active > 0 {
            return self.fail("no decodable active problem records".to_string());
        }

        let snapshot = DashboardSnapshot {
            active_problems,
            recent_problems,
            timeframe,
            saved_at: now,
        };
        if let Err(e) = self.store.set(&self.variant.storage_key(), &snapshot) {
            warn!("[{}] failed to persist snapshot: {e}", self.variant);
        }

        let outcome = RefreshOutcome::Fetched {
            active: snapshot.active_problems.len(),
            recent: snapshot.recent_problems.len(),
        };
        {
            let mut state = self.state.lock();
            state.active_problems = snapshot.active_problems;
            state.recent_problems = snapshot.recent_problems;
            state.timeframe = timeframe;
            state.last_refresh = Some(now);
            state.loading = false;
            state.error = None;
            state.from_cache = false;
        }
        if let Some(health) = &self.health {
            health.mark_backend_available();
        }
        info!("[{}] refreshed: {outcome:?}", self.variant);
        outcome
    }

    fn discard(&self) -> RefreshOutcome {
        self.state.lock().loading = false;
        RefreshOutcome::Discarded
    }

    /// Keeps whatever is on display. An empty view falls back to the last
    /// snapshot, however old.
    fn fail(&self, error: String) -> RefreshOutcome {
        warn!("[{}] refresh failed: {error}", self.variant);
        let fallback = {
            let state = self.state.lock();
            state.active_problems.is_empty() && state.recent_problems.is_empty()
        }
        .then(|| self.stored_snapshot())
        .flatten();
        if let Some(snapshot) = fallback {
            self.apply_snapshot(snapshot);
        }

        {
            let mut state = self.state.lock();
            state.loading = false;
            state.error = Some(error.clone());
        }
        if let Some(health) = &self.health {
            health.mark_backend_unavailable(&error);
        }
        RefreshOutcome::Failed { error }
    }

    async fn purge_caches(&self) {
        match self.store.remove_prefixed(DASHBOARD_KEY_PREFIX) {
            Ok(n) => info!("[{}] dropped {n} persisted dashboard snapshots", self.variant),
            Err(e) => warn!("[{}] failed to drop snapshots: {e}", self.variant),
        }
        self.client.clear_cache();
        if let Some(e) = self.client.request_backend_reload().await.error {
            warn!("[{}] backend reload request failed: {e}", self.variant);
        }
    }

    fn stored_snapshot(&self) -> Option<DashboardSnapshot> {
        self.store.get(&self.variant.storage_key())
    }

    fn fresh_snapshot(&self, timeframe: Timeframe) -> Option<DashboardSnapshot> {
        let snapshot = self.stored_snapshot()?;
        let age = OffsetDateTime::now_utc() - snapshot.saved_at;
        let fresh = !age.is_negative() && (age.whole_milliseconds() as u128) < self.ttl.as_millis();
        (fresh && snapshot.timeframe == timeframe).then_some(snapshot)
    }

    fn apply_snapshot(&self, snapshot: DashboardSnapshot) {
        let mut state = self.state.lock();
        state.active_problems = snapshot.active_problems;
        state.recent_problems = snapshot.recent_problems;
        state.timeframe = snapshot.timeframe;
        state.last_refresh = Some(snapshot.saved_at);
        state.loading = false;
        state.error = None;
        state.from_cache = true;
    }
}

impl Drop for DashboardCache {
    fn drop(&mut self) {
        if let Some(handle) = self.refresher.get_mut().take() {
            handle.abort();
        }
    }
}
