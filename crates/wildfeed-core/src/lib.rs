// Core feed logic: queries, fetching, merging, paging and stats
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod models;
pub mod pager;
pub mod query;
pub mod sources;
pub mod stats;
pub mod store;

pub use config::Config;
pub use engine::FeedEngine;
pub use error::{Error, SourceFailure};
pub use fetcher::{Aggregator, PageOutcome, PageTransport, SourcePage};
pub use models::{
    Area, DateRange, Filters, GeoPoint, Grade, MediaConstraint, ObservationRecord, Source,
    StatsSnapshot, TaxonSelection, ViewMode,
};
pub use pager::{FeedSession, FeedView, LoadOutcome, PageTicket, SessionState};
pub use stats::{QueryTrigger, StatsManager, StatsSource};
pub use store::{MemoryStore, PersistedState, StateStore};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
