// Session state machine for the incremental feed
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{Error, SourceFailure};
use crate::fetcher::{PageOutcome, SourcePage};
use crate::merge::merge;
use crate::models::{Filters, ObservationRecord, Source};
use crate::Result;

/// Where a session is in its load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh session, nothing requested yet
    Idle,
    /// First page in flight
    Loading,
    /// Quiet; `load_more` may run
    Ready,
    /// Continuation page in flight
    LoadingMore { page: u32 },
}

/// Identifies one page request of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTicket {
    pub generation: u64,
    pub page: u32,
}

/// What the engine needs to go fetch a page
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub ticket: PageTicket,
    pub filters: Filters,
}

/// What happened to a load attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded {
        page: u32,
        added: usize,
        total: u64,
        has_more: bool,
        warnings: Vec<SourceFailure>,
    },
    /// Guards said no; nothing was requested
    Skipped,
    /// A newer query took over; the result was discarded
    Superseded,
}

/// Read-only copy of the feed handed to consumers
#[derive(Debug, Clone, PartialEq)]
pub struct FeedView {
    pub filters: Filters,
    pub items: Vec<ObservationRecord>,
    pub page: u32,
    pub total: u64,
    pub has_more: bool,
    pub state: SessionState,
    pub last_error: Option<String>,
}

/// Results, cursor and flags belonging to one filter configuration
///
/// Only this type and the merge engine touch `items`, `page` and `has_more`.
/// Replacing the filters starts a new generation; anything still in flight
/// for an older generation is ignored when it lands.
#[derive(Debug, Clone)]
pub struct FeedSession {
    filters: Filters,
    items: Vec<ObservationRecord>,
    page: u32,
    pages_loaded: u32,
    total: u64,
    has_more: bool,
    state: SessionState,
    generation: u64,
    source_totals: BTreeMap<Source, u64>,
    last_error: Option<String>,
}

impl FeedSession {
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            items: Vec::new(),
            page: 1,
            pages_loaded: 0,
            total: 0,
            has_more: true,
            state: SessionState::Idle,
            generation: 0,
            source_totals: BTreeMap::new(),
            last_error: None,
        }
    }

    /// Throw the current session away and start over with new filters
    pub fn reset(&mut self, filters: Filters) {
        let generation = self.generation + 1;
        *self = Self::new(filters);
        self.generation = generation;
        debug!("Session reset, generation {}", generation);
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn items(&self) -> &[ObservationRecord] {
        &self.items
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            filters: self.filters.clone(),
            items: self.items.clone(),
            page: self.page,
            total: self.total,
            has_more: self.has_more,
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }

    /// Start loading page 1; `None` if a load is already running
    pub fn begin_initial(&mut self) -> Option<PageRequest> {
        if self.state != SessionState::Idle {
            return None;
        }
        self.state = SessionState::Loading;
        Some(self.request(1))
    }

    /// Start the next page if, and only if, the session is ready for it
    ///
    /// Quiet state, more data upstream, nothing in flight. Rapid scroll
    /// events hitting this all at once produce exactly one request.
    pub fn begin_load_more(&mut self) -> Option<PageRequest> {
        if self.state != SessionState::Ready || !self.has_more {
            return None;
        }

        let next = self.pages_loaded + 1;
        self.state = if next == 1 {
            SessionState::Loading
        } else {
            SessionState::LoadingMore { page: next }
        };
        Some(self.request(next))
    }

    fn request(&self, page: u32) -> PageRequest {
        PageRequest {
            ticket: PageTicket {
                generation: self.generation,
                page,
            },
            filters: self.filters.clone(),
        }
    }

    /// Land a page result
    ///
    /// Results for an older generation are dropped. A fully failed page
    /// leaves items alone and puts the session back in `Ready` for a retry.
    pub fn complete(
        &mut self,
        request: &PageRequest,
        outcome: PageOutcome,
    ) -> Result<LoadOutcome> {
        let ticket = request.ticket;
        if ticket.generation != self.generation {
            debug!(
                "Dropping page {} of stale generation {} (now {})",
                ticket.page, ticket.generation, self.generation
            );
            return Ok(LoadOutcome::Superseded);
        }

        match outcome {
            PageOutcome::Aborted => {
                self.state = if self.pages_loaded == 0 && ticket.page == 1 {
                    SessionState::Idle
                } else {
                    SessionState::Ready
                };
                Ok(LoadOutcome::Superseded)
            }
            PageOutcome::AllFailed(failures) => {
                self.state = SessionState::Ready;
                let err = Error::AllSourcesFailed {
                    page: ticket.page,
                    failures,
                };
                self.last_error = Some(err.to_string());
                Err(err)
            }
            PageOutcome::Loaded { pages, warnings } => {
                let pages = self.carry_known_totals(ticket.page, pages, &warnings);
                let merged = merge(&self.items, ticket.page, pages);

                self.items = merged.items;
                self.total = merged.total;
                self.has_more = merged.has_more;
                self.page = ticket.page;
                self.pages_loaded = ticket.page;
                self.state = SessionState::Ready;
                self.last_error = None;

                info!(
                    "Page {} merged: +{} items ({} of {}), more: {}",
                    ticket.page,
                    merged.added,
                    self.items.len(),
                    self.total,
                    self.has_more
                );

                Ok(LoadOutcome::Loaded {
                    page: ticket.page,
                    added: merged.added,
                    total: self.total,
                    has_more: self.has_more,
                    warnings,
                })
            }
        }
    }

    /// Remember each source's total and stand in for sources that failed this page
    ///
    /// A source that worked on page 1 and hiccups on page 3 still has records
    /// upstream; dropping its total would make the feed look finished.
    fn carry_known_totals(
        &mut self,
        page: u32,
        mut pages: Vec<SourcePage>,
        warnings: &[SourceFailure],
    ) -> Vec<SourcePage> {
        for p in &pages {
            self.source_totals.insert(p.source, p.reported_total);
        }
        if page > 1 {
            for failure in warnings {
                if let Some(&known) = self.source_totals.get(&failure.source) {
                    pages.push(SourcePage {
                        source: failure.source,
                        records: Vec::new(),
                        reported_total: known,
                    });
                }
            }
        }
        pages
    }

    /// Sentinel proximity check for infinite scroll
    ///
    /// True when the last visible index is within `threshold` of the end and
    /// a `begin_load_more` would actually start something.
    pub fn should_prefetch(&self, last_visible_index: usize, threshold: usize) -> bool {
        if self.state != SessionState::Ready || !self.has_more {
            return false;
        }
        last_visible_index.saturating_add(threshold) + 1 >= self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OriginCounts, QualityFlags};

    fn record(source: Source, id: usize) -> ObservationRecord {
        ObservationRecord {
            id: id.to_string(),
            source,
            title: String::new(),
            description: String::new(),
            media: Vec::new(),
            location: None,
            observation_date: None,
            created_at: None,
            quality: QualityFlags::default(),
            counts: OriginCounts::default(),
        }
    }

    fn loaded(source: Source, ids: std::ops::Range<usize>, total: u64) -> PageOutcome {
        PageOutcome::Loaded {
            pages: vec![SourcePage {
                source,
                records: ids.map(|i| record(source, i)).collect(),
                reported_total: total,
            }],
            warnings: Vec::new(),
        }
    }

    fn failure(source: Source) -> SourceFailure {
        SourceFailure {
            source,
            reason: "HTTP 500".into(),
        }
    }

    #[test]
    fn test_fresh_session() {
        let session = FeedSession::new(Filters::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.page(), 1);
        assert!(session.items().is_empty());
        assert!(session.has_more());
    }

    #[test]
    fn test_initial_then_more() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        assert_eq!(req.ticket.page, 1);
        assert_eq!(session.state(), SessionState::Loading);
        assert!(session.begin_initial().is_none());

        session.complete(&req, loaded(Source::Bird, 0..30, 60)).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let more = session.begin_load_more().unwrap();
        assert_eq!(more.ticket.page, 2);
        assert_eq!(session.state(), SessionState::LoadingMore { page: 2 });

        // Second trigger while in flight is a no-op
        assert!(session.begin_load_more().is_none());

        session.complete(&more, loaded(Source::Bird, 30..60, 60)).unwrap();
        assert_eq!(session.items().len(), 60);
        assert_eq!(session.page(), 2);
        assert!(!session.has_more());
        assert!(session.begin_load_more().is_none());
    }

    #[test]
    fn test_load_more_needs_ready() {
        let mut session = FeedSession::new(Filters::default());
        assert!(session.begin_load_more().is_none());
    }

    #[test]
    fn test_reset_clears_and_bumps_generation() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        session.complete(&req, loaded(Source::Bird, 0..10, 40)).unwrap();

        session.reset(Filters {
            search: Some("Pitta".into()),
            ..Default::default()
        });
        assert_eq!(session.page(), 1);
        assert!(session.items().is_empty());
        assert!(session.has_more());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.generation(), req.ticket.generation + 1);
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let mut session = FeedSession::new(Filters::default());
        let old = session.begin_initial().unwrap();
        session.reset(Filters::default());

        let outcome = session
            .complete(&old, loaded(Source::Bird, 0..10, 10))
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Superseded);
        assert!(session.items().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_all_failed_first_page_allows_retry() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        let err = session
            .complete(
                &req,
                PageOutcome::AllFailed(vec![
                    failure(Source::Bird),
                    failure(Source::Butterfly),
                    failure(Source::General),
                ]),
            )
            .unwrap_err();

        assert!(matches!(err, Error::AllSourcesFailed { page: 1, .. }));
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.items().is_empty());
        assert!(session.has_more());
        assert!(session.last_error().is_some());

        // Retry goes for page 1 again
        let retry = session.begin_load_more().unwrap();
        assert_eq!(retry.ticket.page, 1);
        assert_eq!(session.state(), SessionState::Loading);
    }

    #[test]
    fn test_aborted_page_restores_state() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        session.complete(&req, loaded(Source::Bird, 0..30, 90)).unwrap();

        let more = session.begin_load_more().unwrap();
        let outcome = session.complete(&more, PageOutcome::Aborted).unwrap();
        assert_eq!(outcome, LoadOutcome::Superseded);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.items().len(), 30);
    }

    #[test]
    fn test_failed_source_keeps_its_total_on_later_pages() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        session
            .complete(
                &req,
                PageOutcome::Loaded {
                    pages: vec![
                        SourcePage {
                            source: Source::Bird,
                            records: (0..30).map(|i| record(Source::Bird, i)).collect(),
                            reported_total: 100,
                        },
                        SourcePage {
                            source: Source::General,
                            records: (0..30).map(|i| record(Source::General, i)).collect(),
                            reported_total: 100,
                        },
                    ],
                    warnings: Vec::new(),
                },
            )
            .unwrap();

        let more = session.begin_load_more().unwrap();
        let outcome = session
            .complete(
                &more,
                PageOutcome::Loaded {
                    pages: vec![SourcePage {
                        source: Source::General,
                        records: (30..60).map(|i| record(Source::General, i)).collect(),
                        reported_total: 100,
                    }],
                    warnings: vec![failure(Source::Bird)],
                },
            )
            .unwrap();

        assert_eq!(session.total(), 200);
        assert!(session.has_more());
        assert!(matches!(outcome, LoadOutcome::Loaded { added: 30, .. }));
    }

    #[test]
    fn test_should_prefetch_near_end() {
        let mut session = FeedSession::new(Filters::default());
        let req = session.begin_initial().unwrap();
        session.complete(&req, loaded(Source::Bird, 0..30, 90)).unwrap();

        assert!(!session.should_prefetch(10, 5));
        assert!(session.should_prefetch(24, 5));
        assert!(session.should_prefetch(29, 5));

        session.begin_load_more().unwrap();
        assert!(!session.should_prefetch(29, 5));
    }
}
