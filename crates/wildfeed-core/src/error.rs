use thiserror::Error;

use crate::models::Source;

/// All the ways things can go wrong in WildFeed
///
/// Only page-level and setup failures live here. A single source going dark
/// is a [`SourceFailure`] and travels as a warning next to the data.
#[derive(Error, Debug)]
pub enum Error {
    #[error("All {} sources failed for page {page}", .failures.len())]
    AllSourcesFailed {
        page: u32,
        failures: Vec<SourceFailure>,
    },

    #[error("API error: {0}")]
    ApiError(#[from] wildfeed_api::ApiError),

    #[error("State store error: {0}")]
    CacheError(#[from] wildfeed_cache::CacheError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stats refresh failed: {0}")]
    StatsUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One source failing for one page - recovered locally
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: Source,
    pub reason: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} unavailable: {}", self.source, self.reason)
    }
}
