use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SourceFailure;
use crate::models::{Filters, ObservationRecord, Source};
use crate::query::{self, PerSourceQuery};
use crate::sources::{adapter_for, SourceAdapter};
use wildfeed_api::{ObservationClient, RawPage};

/// Transport seam for collection pages - makes testing easier
///
/// `ObservationClient` is the real one; tests swap in mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_page(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> wildfeed_api::Result<RawPage>;
}

#[async_trait::async_trait]
impl PageTransport for ObservationClient {
    async fn get_page(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> wildfeed_api::Result<RawPage> {
        ObservationClient::get_page(self, path, params).await
    }
}

/// One source's contribution to a page
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    pub source: Source,
    pub records: Vec<ObservationRecord>,
    pub reported_total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(SourcePage),
    Failed(SourceFailure),
    /// Cancelled before it finished; not a failure and carries no data
    Aborted,
}

/// Result of asking every active source for the same page
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Loaded {
        pages: Vec<SourcePage>,
        warnings: Vec<SourceFailure>,
    },
    AllFailed(Vec<SourceFailure>),
    Aborted,
}

/// Fetches and normalizes one page from one source
#[derive(Clone)]
pub struct SourceFetcher {
    transport: Arc<dyn PageTransport>,
}

impl SourceFetcher {
    pub fn new(transport: Arc<dyn PageTransport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self, query: &PerSourceQuery, cancel: &CancellationToken) -> FetchOutcome {
        let adapter = adapter_for(query.source);
        let endpoint = adapter.endpoint();

        if cancel.is_cancelled() {
            return FetchOutcome::Aborted;
        }

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Fetch of {} page {} aborted", query.source, query.page);
                return FetchOutcome::Aborted;
            }
            raw = self.transport.get_page(&endpoint, &query.params) => raw,
        };

        match raw {
            Ok(raw) => FetchOutcome::Loaded(normalize_page(adapter, query, raw)),
            Err(e) => {
                warn!("Source {} failed for page {}: {}", query.source, query.page, e);
                FetchOutcome::Failed(SourceFailure {
                    source: query.source,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn normalize_page(adapter: &dyn SourceAdapter, query: &PerSourceQuery, raw: RawPage) -> SourcePage {
    if raw.malformed {
        warn!(
            "Malformed response from {} page {}; treating as empty",
            query.source, query.page
        );
        return SourcePage {
            source: query.source,
            records: Vec::new(),
            reported_total: 0,
        };
    }

    let received = raw.records.len();
    let mut records: Vec<ObservationRecord> = raw
        .records
        .iter()
        .filter_map(|r| adapter.normalize(r))
        .collect();

    if records.len() < received {
        warn!(
            "Skipped {} {} records without a usable id",
            received - records.len(),
            query.source
        );
    }

    // Upstream occasionally ignores per_page
    records.truncate(query.per_page as usize);

    SourcePage {
        source: query.source,
        records,
        reported_total: raw.total,
    }
}

/// Coordinates one page across all active sources
///
/// Runs sources in parallel and waits for every one of them; a page is never
/// assembled from a partial set of answers.
#[derive(Clone)]
pub struct Aggregator {
    fetcher: SourceFetcher,
    page_size: u32,
}

impl Aggregator {
    pub fn new(transport: Arc<dyn PageTransport>, page_size: u32) -> Self {
        if page_size == 0 {
            warn!("Page size 0 would fetch nothing; using 1");
        }
        Self {
            fetcher: SourceFetcher::new(transport),
            page_size: page_size.max(1),
        }
    }

    pub async fn fetch_page(
        &self,
        filters: &Filters,
        page: u32,
        cancel: &CancellationToken,
    ) -> PageOutcome {
        let queries = query::build(filters, page, self.page_size);
        let fetches: Vec<_> = queries
            .iter()
            .map(|q| self.fetcher.fetch(q, cancel))
            .collect();

        let results = join_all(fetches).await;

        if cancel.is_cancelled() || results.iter().any(|r| matches!(r, FetchOutcome::Aborted)) {
            return PageOutcome::Aborted;
        }

        let mut pages = Vec::new();
        let mut warnings = Vec::new();
        for result in results {
            match result {
                FetchOutcome::Loaded(p) => pages.push(p),
                FetchOutcome::Failed(f) => warnings.push(f),
                FetchOutcome::Aborted => {}
            }
        }

        if pages.is_empty() {
            warn!("Every source failed for page {}", page);
            return PageOutcome::AllFailed(warnings);
        }

        info!(
            "Page {} loaded from {} source(s), {} degraded",
            page,
            pages.len(),
            warnings.len()
        );
        PageOutcome::Loaded { pages, warnings }
    }
}
