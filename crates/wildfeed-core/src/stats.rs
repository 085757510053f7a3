// Aggregate stats that stay put while the feed scrolls
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};
use wildfeed_api::ObservationClient;

use crate::models::{Filters, Source, StatsSnapshot, ViewMode};
use crate::pager::PageTicket;
use crate::query;
use crate::store::PersistedState;
use crate::{Error, Result};

/// Why a query started - decides whether its stats may land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTrigger {
    InitialMount,
    FilterApply,
    FilterReset,
    PaginationContinue,
}

impl QueryTrigger {
    pub fn is_pagination(&self) -> bool {
        matches!(self, QueryTrigger::PaginationContinue)
    }
}

/// Where fresh counts come from
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    async fn source_count(&self, source: Source, params: &[(String, String)]) -> Result<u64>;
    async fn total_species(&self, params: &[(String, String)]) -> Result<u64>;
    async fn total_contributors(&self, params: &[(String, String)]) -> Result<u64>;
}

#[async_trait::async_trait]
impl StatsSource for ObservationClient {
    async fn source_count(&self, source: Source, params: &[(String, String)]) -> Result<u64> {
        Ok(self.get_number(&source.count_endpoint(), params).await?)
    }

    async fn total_species(&self, params: &[(String, String)]) -> Result<u64> {
        Ok(self.get_number("total-species", params).await?)
    }

    async fn total_contributors(&self, params: &[(String, String)]) -> Result<u64> {
        Ok(self.get_number("total-contributors", params).await?)
    }
}

/// Fetch a complete snapshot for a filter configuration
///
/// All endpoints are hit concurrently. Any single failure fails the whole
/// snapshot; half-fresh numbers are worse than slightly stale ones.
pub async fn fetch_snapshot(source: &dyn StatsSource, filters: &Filters) -> Result<StatsSnapshot> {
    let active = filters.active_sources();
    let general_params = query::filter_params(filters, Source::General);

    let count_params: Vec<_> = active
        .iter()
        .map(|s| (*s, query::filter_params(filters, *s)))
        .collect();
    let counts = join_all(
        count_params
            .iter()
            .map(|(s, params)| source.source_count(*s, params)),
    );

    let (counts, species, contributors) = tokio::join!(
        counts,
        source.total_species(&general_params),
        source.total_contributors(&general_params)
    );

    let mut by_source = BTreeMap::new();
    for ((s, _), count) in count_params.iter().zip(counts) {
        let count = count.map_err(|e| Error::StatsUnavailable(format!("{} count: {}", s, e)))?;
        by_source.insert(*s, count);
    }

    let species = species.map_err(|e| Error::StatsUnavailable(format!("species: {}", e)))?;
    let contributors =
        contributors.map_err(|e| Error::StatsUnavailable(format!("contributors: {}", e)))?;

    Ok(StatsSnapshot::from_counts(by_source, species, contributors))
}

#[derive(Debug, Clone, Copy)]
struct Latch {
    ticket: PageTicket,
    since: Instant,
}

/// Keeps the stats snapshot consistent across queries, scrolling and view switches
///
/// The snapshot is replaced only when a query that was *not* a pagination
/// continuation completes with fresh numbers. While a continuation is in
/// flight the latch is held and the snapshot captured at session start is
/// re-asserted. The latch lets go when the matching page finishes or after
/// `latch_timeout`, whichever comes first.
pub struct StatsManager {
    snapshot: StatsSnapshot,
    session_snapshot: StatsSnapshot,
    pending: Option<QueryTrigger>,
    latch: Option<Latch>,
    latch_timeout: Duration,
    view: ViewMode,
    view_snapshots: HashMap<ViewMode, StatsSnapshot>,
    state: PersistedState,
}

impl StatsManager {
    /// Seed from whatever the persisted store remembers; empty is fine
    pub fn load(state: PersistedState, latch_timeout: Duration) -> Self {
        let snapshot = state.stats_snapshot().unwrap_or_default();
        let view = state.view_mode().unwrap_or_default();

        let view_snapshots = ViewMode::ALL
            .into_iter()
            .filter_map(|v| state.view_snapshot(v).map(|s| (v, s)))
            .collect();

        debug!(
            "Stats seeded: {} observations, view {}",
            snapshot.total_observations,
            view.as_str()
        );

        Self {
            session_snapshot: snapshot.clone(),
            snapshot,
            pending: None,
            latch: None,
            latch_timeout,
            view,
            view_snapshots,
            state,
        }
    }

    pub fn snapshot(&self) -> &StatsSnapshot {
        &self.snapshot
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn is_latched(&self) -> bool {
        self.is_latched_at(Instant::now())
    }

    fn is_latched_at(&self, now: Instant) -> bool {
        self.latch
            .map_or(false, |l| now.saturating_duration_since(l.since) < self.latch_timeout)
    }

    pub fn on_query_start(&mut self, trigger: QueryTrigger) {
        if !trigger.is_pagination() {
            // A new query supersedes whatever scroll was holding the latch
            self.latch = None;
        }
        self.pending = Some(trigger);
    }

    /// Returns whether the snapshot was replaced
    pub fn on_query_complete(&mut self, fresh: Option<StatsSnapshot>) -> bool {
        let trigger = self.pending.take();
        let may_replace = matches!(trigger, Some(t) if !t.is_pagination()) && !self.is_latched();

        match fresh {
            Some(fresh) if may_replace => {
                info!(
                    "Stats replaced: {} observations, {} species",
                    fresh.total_observations, fresh.total_species
                );
                // Other views' snapshots described the old filters
                self.state.clear_view_snapshots();
                self.state.save_stats_snapshot(&fresh);
                self.state.save_view_snapshot(self.view, &fresh);
                self.view_snapshots.clear();
                self.view_snapshots.insert(self.view, fresh.clone());
                self.session_snapshot = fresh.clone();
                self.snapshot = fresh;
                true
            }
            _ => {
                if !may_replace {
                    self.snapshot = self.session_snapshot.clone();
                }
                false
            }
        }
    }

    /// Pagination never touches stats; pin the session's snapshot and latch
    pub fn on_pagination_continue(&mut self, ticket: PageTicket) {
        self.pending = Some(QueryTrigger::PaginationContinue);
        self.latch = Some(Latch {
            ticket,
            since: Instant::now(),
        });
        self.snapshot = self.session_snapshot.clone();
    }

    /// Let go of the latch if `ticket` is the page that took it
    pub fn release_latch(&mut self, ticket: PageTicket) -> bool {
        match self.latch {
            Some(latch) if latch.ticket == ticket => {
                self.latch = None;
                true
            }
            Some(latch) => {
                debug!(
                    "Ignoring latch release for {:?}; held by {:?}",
                    ticket, latch.ticket
                );
                false
            }
            None => false,
        }
    }

    /// Keep the numbers on screen when the presentation mode changes
    pub fn on_view_switch(&mut self, next: ViewMode) -> &StatsSnapshot {
        if next == self.view {
            return &self.snapshot;
        }

        let leaving = self.view;
        self.view_snapshots.insert(leaving, self.snapshot.clone());
        self.state.save_view_snapshot(leaving, &self.snapshot);
        self.state.save_view_mode(next);
        self.state.mark_view_switched();

        match self.view_snapshots.get(&next) {
            Some(saved) if !saved.is_empty() => {
                debug!("Restoring {} stats snapshot", next.as_str());
                self.snapshot = saved.clone();
                self.session_snapshot = saved.clone();
            }
            _ => debug!("No {} snapshot; keeping current stats", next.as_str()),
        }

        if self.snapshot.is_empty() {
            warn!("Entered {} view with empty stats", next.as_str());
        }

        self.view = next;
        &self.snapshot
    }
}
