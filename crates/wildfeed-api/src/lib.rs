// HTTP plumbing for the observation collections and the stats endpoints
pub mod client;
pub mod page;
pub mod retry;

// Re-export common types
pub use client::{ApiError, ObservationClient, Result};
pub use page::RawPage;
pub use retry::RetryConfig;
pub use reqwest::StatusCode;
