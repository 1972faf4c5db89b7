//! HTTP route definitions.

mod feed;
mod health;

use axum::Router;
use axum::routing::get;

use crate::state::AppState;

/// - `GET /ping` - liveness
/// - `GET /{channel}` - RSS feed of the channel (`?format=atom` for Atom)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(health::ping))
        .route("/{channel}", get(feed::channel_feed))
        .with_state(state)
}
