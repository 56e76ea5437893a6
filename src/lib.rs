//! crawld: concurrent URL crawling daemon
//!
//! A small HTTP service with a single job: accept a batch of URLs, fetch each
//! one's status code in parallel, and answer in submission order. Features:
//! - Order-preserving fan-out/fan-in over a bounded worker pool
//! - URL canonicalization so equivalent spellings share one fetch
//! - Short-TTL result cache with single-flight request coalescing
//! - Cooperative cancellation from process shutdown down to batch deadlines

pub mod config;
pub mod crawl;
pub mod server;

pub use config::Config;
pub use crawl::Crawler;
pub use server::CrawlServer;
