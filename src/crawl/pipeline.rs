//! Order-preserving crawl pipeline
//!
//! A generator task fingerprints URLs in submission order and feeds indexed
//! jobs to a fixed pool of workers over a bounded channel. Workers resolve
//! each job through the cache and write the outcome into the slot for the
//! job's original index, so ordering never depends on completion time and
//! the slices need no locking beyond each slot's one-shot write.

use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache::FetchCache;
use super::fetcher::Fetcher;
use super::{normalize, UrlOutcome};

/// One unit of work: the input position plus either the canonical
/// fingerprint or the parse error that takes its place.
///
/// Carrying the error through the channel keeps the invariant that every
/// input index reaches a worker and every slot gets written.
struct Job {
    index: usize,
    target: Result<String, String>,
}

/// Spawn the generator and worker tasks for one batch.
///
/// `urls` must be non-empty. Returns the task handles; the caller decides
/// how long to wait on them and fills any slots left empty after
/// cancellation.
pub(super) fn spawn(
    urls: Vec<String>,
    workers: usize,
    cancel: CancellationToken,
    fetcher: Arc<Fetcher>,
    cache: Arc<FetchCache>,
    slots: Arc<Vec<OnceLock<UrlOutcome>>>,
) -> Vec<JoinHandle<()>> {
    let worker_count = workers.clamp(1, urls.len());
    let (tx, rx) = mpsc::channel::<Job>(worker_count);
    let rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::with_capacity(worker_count + 1);
    handles.push(spawn_generator(urls, tx, cancel.clone()));
    for _ in 0..worker_count {
        handles.push(spawn_worker(
            rx.clone(),
            cancel.clone(),
            fetcher.clone(),
            cache.clone(),
            slots.clone(),
        ));
    }
    handles
}

fn spawn_generator(
    urls: Vec<String>,
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for (index, raw) in urls.into_iter().enumerate() {
            let target =
                normalize::canonicalize(&raw).map_err(|e| format!("invalid url: {e}"));
            let job = Job { index, target };
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(job) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_worker(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
    fetcher: Arc<Fetcher>,
    cache: Arc<FetchCache>,
    slots: Arc<Vec<OnceLock<UrlOutcome>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Take the shared receiver only long enough to pull one job.
            let job = {
                let mut rx = tokio::select! {
                    _ = cancel.cancelled() => return,
                    guard = rx.lock() => guard,
                };
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = rx.recv() => match received {
                        Some(job) => job,
                        None => return,
                    },
                }
            };

            let outcome = match job.target {
                Err(message) => UrlOutcome::Failed(message),
                Ok(fingerprint) => {
                    let produce = || {
                        let fetcher = fetcher.clone();
                        let url = fingerprint.clone();
                        async move { fetcher.fetch(&url).await }
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        outcome = cache.get_or_fetch(&fingerprint, produce) => outcome,
                    }
                }
            };

            // First writer wins; a racing deadline placeholder may already
            // be here.
            let _ = slots[job.index].set(outcome);
        }
    })
}
