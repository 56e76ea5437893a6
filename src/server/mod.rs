//! HTTP server for the crawl API

pub mod handlers;
pub mod routes;
mod server;
pub mod types;

pub use server::CrawlServer;

use std::sync::Arc;

use crate::crawl::Crawler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub crawler: Arc<Crawler>,
}
