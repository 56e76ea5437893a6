//! Crawling subsystem
//!
//! Everything between the HTTP handler and the wire:
//! - `normalize`: canonical URL fingerprints for deduplication
//! - `fetcher`: one shared, pooled HTTP client for all upstream fetches
//! - `cache`: short-TTL memoization with single-flight coalescing
//! - `pipeline`: order-preserving fan-out over a bounded worker pool
//!
//! The `Crawler` ties them together and runs one batch under one deadline.

pub mod cache;
pub mod fetcher;
pub mod normalize;
mod pipeline;

pub use cache::FetchCache;
pub use fetcher::Fetcher;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FetchConfig;

/// Error text for slots still unresolved when the batch deadline fires.
pub(crate) const TIMEOUT_EXCEEDED: &str = "timeout exceeded";

/// Error text for slots lost to a crashed worker.
pub(crate) const WORKER_FAILED: &str = "crawl worker failed";

/// Materialized result of crawling one URL.
///
/// Any HTTP status is a success at this level; `Failed` covers everything
/// that prevented getting a status (parse errors, transport errors, the
/// batch deadline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    Status(u16),
    Failed(String),
}

/// Batch crawl service
///
/// Owns the shared fetch client and the cache / single-flight state for the
/// whole server run; individual batches borrow them through `crawl`.
pub struct Crawler {
    fetcher: Arc<Fetcher>,
    cache: Arc<FetchCache>,
}

impl Crawler {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Arc::new(Fetcher::new(config)?),
            cache: Arc::new(FetchCache::new()),
        })
    }

    /// Crawl a batch of URLs with `workers` concurrent fetches, answering in
    /// input order.
    ///
    /// Always returns exactly one outcome per input URL. Slots that are
    /// still unresolved when `timeout` elapses come back as
    /// `Failed("timeout exceeded")`; a slot may still win the race if its
    /// fetch completed before the cancellation was observed.
    pub async fn crawl(
        &self,
        urls: &[String],
        workers: usize,
        timeout: Duration,
    ) -> Vec<UrlOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u64::MAX / 2));

        let cancel = CancellationToken::new();
        // If this future is dropped (client went away) the workers stop too.
        let _disconnect_guard = cancel.clone().drop_guard();

        let slots: Arc<Vec<OnceLock<UrlOutcome>>> =
            Arc::new((0..urls.len()).map(|_| OnceLock::new()).collect());

        let handles = pipeline::spawn(
            urls.to_vec(),
            workers,
            cancel.clone(),
            self.fetcher.clone(),
            self.cache.clone(),
            slots.clone(),
        );

        let drained = async {
            for handle in handles {
                // A panicked worker only loses its own slot; the join error
                // is absorbed here and the slot filled below.
                let _ = handle.await;
            }
        };

        let timed_out = tokio::time::timeout_at(deadline, drained).await.is_err();
        if timed_out {
            debug!("batch deadline reached, cancelling outstanding fetches");
            cancel.cancel();
        }

        let placeholder = if timed_out { TIMEOUT_EXCEEDED } else { WORKER_FAILED };
        slots
            .iter()
            .map(|slot| {
                slot.get_or_init(|| UrlOutcome::Failed(placeholder.to_string()))
                    .clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler() -> Crawler {
        Crawler::new(&FetchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcomes = crawler()
            .crawl(&[], 4, Duration::from_millis(1000))
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_urls_fill_their_slots_in_order() {
        let urls: Vec<String> = [
            "http://example.com:abc",
            "http://[::1",
            "http://%41",
            "://example.com",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let outcomes = crawler()
            .crawl(&urls, 4, Duration::from_millis(3000))
            .await;

        assert_eq!(outcomes.len(), urls.len());
        let expected = [
            "invalid port",
            "missing ']' in host",
            "invalid URL escape",
            "missing protocol scheme",
        ];
        for (outcome, phrase) in outcomes.iter().zip(expected) {
            match outcome {
                UrlOutcome::Failed(message) => {
                    assert!(message.contains(phrase), "{message} missing {phrase}")
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_unresolvable_batch_times_out_per_slot() {
        // 192.0.2.0/24 is TEST-NET; nothing answers, so the deadline hits
        // before connect gives up.
        let urls = vec!["http://192.0.2.1/x".to_string(); 3];
        let outcomes = crawler()
            .crawl(&urls, 2, Duration::from_millis(100))
            .await;

        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            match outcome {
                UrlOutcome::Failed(message) => assert!(
                    !message.is_empty(),
                    "timeout slots must carry an error description"
                ),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }
}
