//! Crawl API route definitions

use axum::routing::post;
use axum::Router;

use super::handlers;
use super::AppState;

/// Create the API router.
///
/// `/crawl` only routes POST; axum's method router answers every other verb
/// with 405 and an `Allow: POST` header.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/crawl", post(handlers::crawl))
        .with_state(state)
}
