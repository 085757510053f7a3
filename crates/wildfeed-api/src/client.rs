use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::page::{first_number, RawPage};
use crate::retry::{is_retryable_status, with_retry, RetryConfig};

const USER_AGENT: &str = "WildFeed/0.1.0";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request to {path} failed with status {status}: {body}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Response from {0} carried no numeric field")]
    MissingNumber(String),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether a retry has any chance of a different answer
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => is_retryable_status(*status),
            ApiError::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Client for the observation collections and their stats endpoints
///
/// Knows nothing about sources or filters; callers hand it a path relative to
/// the base URL and an already-built list of query parameters.
#[derive(Clone)]
pub struct ObservationClient {
    client: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl ObservationClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(base_url, RetryConfig::default(), Duration::from_secs(20))
    }

    /// Build a client with explicit retry policy and transport-level timeout
    pub fn with_options(
        base_url: &str,
        retry_config: RetryConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::InvalidBaseUrl(base_url));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(USER_AGENT),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            retry_config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET one page of a collection, e.g. `bird-observations`
    ///
    /// Non-2xx answers are errors. Bodies that parse but have the wrong shape
    /// are not; they come back as a malformed empty page.
    pub async fn get_page(&self, path: &str, params: &[(String, String)]) -> Result<RawPage> {
        let text = self.get_text(path, params).await?;
        let page = RawPage::from_text(&text);
        if page.malformed {
            debug!("Malformed page body from {}", path);
        }
        Ok(page)
    }

    /// GET a stats endpoint and read its single numeric field
    pub async fn get_number(&self, path: &str, params: &[(String, String)]) -> Result<u64> {
        let text = self.get_text(path, params).await?;
        let body: serde_json::Value = serde_json::from_str(&text)?;
        first_number(&body).ok_or_else(|| ApiError::MissingNumber(path.to_string()))
    }

    async fn get_text(&self, path: &str, params: &[(String, String)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        with_retry(&self.retry_config, ApiError::is_retryable, || async {
            debug!("GET {} ({} params)", url, params.len());
            let response = self.client.get(&url).query(params).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    path: path.to_string(),
                    status,
                    body,
                });
            }

            Ok(response.text().await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_base_url_without_scheme() {
        assert!(matches!(
            ObservationClient::new("api.example.org"),
            Err(ApiError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_trims_trailing_slash() {
        let client = ObservationClient::new("https://api.example.org/v1/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.org/v1");
    }

    #[test]
    fn test_status_errors_know_if_retry_helps() {
        let server_error = ApiError::Status {
            path: "bird-observations".into(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        let not_found = ApiError::Status {
            path: "bird-observations".into(),
            status: reqwest::StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(server_error.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!ApiError::MissingNumber("total-species".into()).is_retryable());
    }
}
