//! Crawl API server
//!
//! Binds the listen address, serves `/crawl`, and shuts down gracefully when
//! the caller's cancellation token fires: the listener closes, in-flight
//! requests get a bounded grace period to finish, and whatever remains is
//! force-closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawl::Crawler;

use super::routes::create_router;
use super::AppState;

/// Crawl service server
///
/// Owns the crawler, and with it the fetch client, cache, and in-flight
/// map, for the entire run.
pub struct CrawlServer {
    config: Config,
    crawler: Arc<Crawler>,
}

impl CrawlServer {
    pub fn new(config: Config) -> Result<Self> {
        let crawler = Arc::new(Crawler::new(&config.fetch)?);
        Ok(Self { config, crawler })
    }

    /// Serve on `addr` until `shutdown` fires.
    ///
    /// Returns an error only when binding fails. Graceful termination, even
    /// one that overruns the grace period and force-closes connections,
    /// resolves to Ok after shutdown has completed.
    pub async fn listen_and_serve(
        &self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let app = create_router(AppState {
            crawler: self.crawler.clone(),
        })
        .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener.local_addr().context("Failed to read local address")?;

        info!("crawl server listening on http://{}", local_addr);

        let drain = shutdown.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            drain.cancelled().await;
            info!("crawl server shutting down");
        });

        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        tokio::select! {
            served = serve => {
                served.context("crawl server error")?;
            }
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    "graceful shutdown exceeded {:?}, closing remaining connections",
                    grace
                );
            }
        }

        Ok(())
    }

    /// Resolve the configured listen address and serve on it.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = self
            .config
            .server
            .listen_addr
            .parse()
            .context("Invalid listen address")?;
        self.listen_and_serve(addr, shutdown).await
    }
}
