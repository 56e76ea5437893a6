//! Crawl API request handlers

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use super::types::{CrawlRequest, CrawlResult};
use super::AppState;

/// Upper bound on the per-batch worker pool size
pub(crate) const MAX_WORKERS: u64 = 1024;

/// `POST /crawl`: fetch a batch of URLs and answer in submission order.
///
/// Validation failures are 400s; once a batch is accepted the response is
/// always 200 with one element per input URL, and per-URL failures (parse
/// errors, transport errors, the batch deadline) live inside those elements.
pub async fn crawl(
    State(state): State<AppState>,
    payload: Result<Json<CrawlRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        // Malformed JSON, unknown fields, and missing fields are all client
        // errors here; axum would split them across 400 and 422 otherwise.
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    if request.workers == 0 || request.workers > MAX_WORKERS {
        return (
            StatusCode::BAD_REQUEST,
            format!("workers must be between 1 and {MAX_WORKERS}"),
        )
            .into_response();
    }
    if request.timeout_ms == 0 {
        return (StatusCode::BAD_REQUEST, "timeout_ms must be positive").into_response();
    }

    debug!(
        urls = request.urls.len(),
        workers = request.workers,
        timeout_ms = request.timeout_ms,
        "crawl batch accepted"
    );

    let outcomes = state
        .crawler
        .crawl(
            &request.urls,
            request.workers as usize,
            Duration::from_millis(request.timeout_ms),
        )
        .await;

    let results: Vec<CrawlResult> = request
        .urls
        .into_iter()
        .zip(outcomes)
        .map(|(url, outcome)| CrawlResult::from_outcome(url, outcome))
        .collect();

    Json(results).into_response()
}
