// Feed engine: sessions, stats and cancellation wired together
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wildfeed_api::ObservationClient;
use wildfeed_cache::CacheManager;

use crate::config::Config;
use crate::debounce::{Debouncer, QueryHandle};
use crate::fetcher::{Aggregator, PageOutcome, PageTransport};
use crate::models::{Area, Filters, StatsSnapshot, ViewMode};
use crate::pager::{FeedSession, FeedView, LoadOutcome};
use crate::stats::{fetch_snapshot, QueryTrigger, StatsManager, StatsSource};
use crate::store::{PersistedState, StateStore};
use crate::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The one place consumers talk to
///
/// Session and stats live behind plain mutexes that are never held across an
/// `.await`. Every query runs under a [`QueryHandle`]; starting a new one
/// cancels the last, and the session's generation check discards anything
/// that still slips through.
pub struct FeedEngine {
    aggregator: Aggregator,
    stats_source: Arc<dyn StatsSource>,
    session: Mutex<FeedSession>,
    stats: Mutex<StatsManager>,
    state: PersistedState,
    debouncer: Debouncer,
    default_filters: Filters,
    prefetch_threshold: usize,
    switch_flag_ttl: Duration,
}

impl FeedEngine {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        stats_source: Arc<dyn StatsSource>,
        state: PersistedState,
        config: &Config,
    ) -> Self {
        let default_filters = Filters {
            sources: config.feed.sources.iter().copied().collect(),
            ..Default::default()
        };

        let mut initial = default_filters.clone();
        if let Some(polygon) = state.active_polygon() {
            debug!("Restored active polygon with {} points", polygon.len());
            initial.area = Some(Area::Polygon(polygon));
        }

        Self {
            aggregator: Aggregator::new(transport, config.feed.page_size),
            stats_source,
            session: Mutex::new(FeedSession::new(initial)),
            stats: Mutex::new(StatsManager::load(
                state.clone(),
                config.stats.latch_timeout(),
            )),
            state,
            debouncer: Debouncer::new(config.feed.debounce()),
            default_filters,
            prefetch_threshold: config.feed.prefetch_threshold,
            switch_flag_ttl: config.stats.switch_flag_ttl(),
        }
    }

    /// Real HTTP client plus the SQLite state store
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Arc::new(ObservationClient::with_options(
            &config.api.base_url,
            config.api.retry_config(),
            config.api.timeout(),
        )?);

        let store: Arc<dyn StateStore> = if config.cache.ephemeral {
            Arc::new(CacheManager::in_memory()?)
        } else {
            Arc::new(CacheManager::new(config.cache.resolved_db_path()?)?)
        };

        info!("Feed engine using {}", client.base_url());
        Ok(Self::new(
            client.clone(),
            client,
            PersistedState::new(store),
            config,
        ))
    }

    fn session(&self) -> MutexGuard<'_, FeedSession> {
        lock(&self.session)
    }

    fn stats_manager(&self) -> MutexGuard<'_, StatsManager> {
        lock(&self.stats)
    }

    /// Cloned read-only copy of the feed
    pub fn feed(&self) -> FeedView {
        self.session().view()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats_manager().snapshot().clone()
    }

    pub fn view(&self) -> ViewMode {
        self.stats_manager().view()
    }

    /// First load of whatever filters the session starts with
    pub async fn mount(&self) -> Result<LoadOutcome> {
        let filters = self.session().filters().clone();
        let handle = self.debouncer.submit();
        self.run_query(filters, QueryTrigger::InitialMount, &handle)
            .await
    }

    /// Replace the filters and load page 1 right away
    pub async fn apply_filters(&self, filters: Filters) -> Result<LoadOutcome> {
        let handle = self.debouncer.submit();
        self.run_query(filters, QueryTrigger::FilterApply, &handle)
            .await
    }

    /// Back to the configured defaults
    pub async fn reset(&self) -> Result<LoadOutcome> {
        let handle = self.debouncer.submit();
        self.run_query(
            self.default_filters.clone(),
            QueryTrigger::FilterReset,
            &handle,
        )
        .await
    }

    /// Debounced [`apply_filters`](Self::apply_filters) for rapid edits
    ///
    /// Only the last submission inside the quiet period runs; earlier ones
    /// resolve to [`LoadOutcome::Superseded`] without touching anything.
    pub fn submit_filters(
        self: &Arc<Self>,
        filters: Filters,
    ) -> JoinHandle<Result<LoadOutcome>> {
        let handle = self.debouncer.submit();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if !engine.debouncer.wait(&handle).await {
                return Ok(LoadOutcome::Superseded);
            }
            engine
                .run_query(filters, QueryTrigger::FilterApply, &handle)
                .await
        })
    }

    async fn run_query(
        &self,
        filters: Filters,
        trigger: QueryTrigger,
        handle: &QueryHandle,
    ) -> Result<LoadOutcome> {
        let token = handle.token();
        if token.is_cancelled() {
            return Ok(LoadOutcome::Superseded);
        }

        match &filters.area {
            Some(Area::Polygon(points)) => self.state.save_active_polygon(Some(points.as_slice())),
            _ => self.state.save_active_polygon(None),
        }

        let request = {
            let mut session = self.session();
            session.reset(filters);
            session.begin_initial()
        };
        let Some(request) = request else {
            return Ok(LoadOutcome::Skipped);
        };

        // Coming straight back from a view switch: the persisted numbers are
        // already right, don't refetch them
        let refresh_stats = trigger != QueryTrigger::InitialMount
            || !self.state.recently_switched_view(self.switch_flag_ttl);
        if refresh_stats {
            self.stats_manager().on_query_start(trigger);
        } else {
            debug!("Skipping stats refresh right after a view switch");
        }

        info!("Starting {:?} query (generation {})", trigger, request.ticket.generation);

        let (outcome, fresh) = tokio::join!(
            self.aggregator.fetch_page(&request.filters, 1, token),
            self.fetch_stats(&request.filters, refresh_stats, token)
        );

        if token.is_cancelled() {
            return self.session().complete(&request, PageOutcome::Aborted);
        }

        if refresh_stats {
            self.stats_manager().on_query_complete(fresh);
        }

        let result = self.session().complete(&request, outcome);
        log_outcome(&result);
        result
    }

    async fn fetch_stats(
        &self,
        filters: &Filters,
        enabled: bool,
        token: &CancellationToken,
    ) -> Option<StatsSnapshot> {
        if !enabled {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = fetch_snapshot(self.stats_source.as_ref(), filters) => match result {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Stats refresh failed, keeping previous numbers: {}", e);
                    None
                }
            },
        }
    }

    /// Continue the current session with its next page
    ///
    /// A no-op unless the session is quiet and has more to give, so any
    /// number of concurrent triggers produce at most one request.
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        let Some(request) = self.session().begin_load_more() else {
            debug!("load_more ignored; session busy or exhausted");
            return Ok(LoadOutcome::Skipped);
        };

        let handle = self.debouncer.current();
        self.stats_manager().on_pagination_continue(request.ticket);

        let outcome = self
            .aggregator
            .fetch_page(&request.filters, request.ticket.page, handle.token())
            .await;

        let result = self.session().complete(&request, outcome);
        self.stats_manager().release_latch(request.ticket);
        log_outcome(&result);
        result
    }

    /// Infinite-scroll hook: prefetch once the viewer nears the end
    pub async fn on_sentinel_visible(&self, last_visible_index: usize) -> Result<LoadOutcome> {
        let near_end = self
            .session()
            .should_prefetch(last_visible_index, self.prefetch_threshold);
        if !near_end {
            return Ok(LoadOutcome::Skipped);
        }
        self.load_more().await
    }

    /// Fetch fresh stats for the current filters outside any page load
    pub async fn refresh_stats(&self) -> Result<StatsSnapshot> {
        let filters = self.session().filters().clone();
        self.stats_manager().on_query_start(QueryTrigger::FilterApply);

        let result = fetch_snapshot(self.stats_source.as_ref(), &filters).await;
        let mut stats = self.stats_manager();
        match result {
            Ok(snapshot) => {
                stats.on_query_complete(Some(snapshot));
                Ok(stats.snapshot().clone())
            }
            Err(e) => {
                stats.on_query_complete(None);
                Err(e)
            }
        }
    }

    /// Switch presentation mode; returns the snapshot to show
    pub fn switch_view(&self, view: ViewMode) -> StatsSnapshot {
        info!("Switching to {} view", view.as_str());
        self.stats_manager().on_view_switch(view).clone()
    }

    /// Cancel whatever is in flight
    pub fn shutdown(&self) {
        self.debouncer.cancel();
    }
}

fn log_outcome(result: &Result<LoadOutcome>) {
    match result {
        Ok(LoadOutcome::Loaded { warnings, .. }) => {
            for failure in warnings {
                warn!("Degraded: {}", failure);
            }
        }
        Ok(_) => {}
        Err(Error::AllSourcesFailed { page, failures }) => {
            for failure in failures {
                warn!("Page {}: {}", page, failure);
            }
        }
        Err(e) => warn!("Load failed: {}", e),
    }
}
