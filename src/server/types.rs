//! Crawl API request/response types
//!
//! JSON wire types for `POST /crawl`.

use serde::{Deserialize, Serialize};

use crate::crawl::UrlOutcome;

/// Crawl request body
///
/// Decoding is strict: unknown fields are rejected, and every field is
/// required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlRequest {
    /// URLs to fetch; order is significant and duplicates are allowed
    pub urls: Vec<String>,
    /// Number of concurrent workers for this batch
    pub workers: u64,
    /// Deadline for the whole batch, in milliseconds
    pub timeout_ms: u64,
}

/// Outcome for one submitted URL
///
/// Exactly one of `status_code` and `error` is present; `url` echoes the
/// submitted string byte-for-byte, never the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn from_outcome(url: String, outcome: UrlOutcome) -> Self {
        match outcome {
            UrlOutcome::Status(code) => Self {
                url,
                status_code: Some(code),
                error: None,
            },
            UrlOutcome::Failed(message) => Self {
                url,
                status_code: None,
                error: Some(message),
            },
        }
    }
}
