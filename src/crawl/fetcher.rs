//! Upstream fetch client
//!
//! One pooled `reqwest::Client` shared by every worker for the lifetime of
//! the service. Only the status code of a response is interesting here, but
//! the body must still be drained on every path: an undrained response tears
//! its TCP connection down instead of returning it to the pool, and
//! connection counts then grow with every request.

use anyhow::Result;
use reqwest::redirect;

use super::UrlOutcome;
use crate::config::FetchConfig;

/// Shared HTTP fetch client
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout())
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self { client })
    }

    /// GET one URL and report its status code.
    ///
    /// Every HTTP status is a successful outcome, 4xx and 5xx included; only
    /// transport failures (DNS, refused connections, aborted sockets) become
    /// `Failed`. Cancellation is by dropping the returned future, which
    /// aborts the in-flight request.
    pub async fn fetch(&self, url: &str) -> UrlOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                drain(response).await;
                UrlOutcome::Status(status)
            }
            Err(e) => UrlOutcome::Failed(describe(&e)),
        }
    }
}

/// Read the body to the end so the connection can be reused.
///
/// A mid-drain error means the connection is already unusable; the status
/// from the headers still stands.
async fn drain(mut response: reqwest::Response) {
    while let Ok(Some(_)) = response.chunk().await {}
}

/// Flatten a reqwest error and its causes into one description.
fn describe(err: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
