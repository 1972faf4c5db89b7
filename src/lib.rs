//! tgrss - public Telegram channels as RSS/Atom feeds.
//!
//! Each request for a channel runs an incremental [`sync::Synchronizer`]
//! pass: the channel's listing page is read to find the newest message id,
//! and only messages newer than the stored cursor are fetched and stored.
//! The result is rendered by [`feed::render`].
//!
//! - **fetch**: the [`fetch::Fetcher`] trait and its `t.me` scraper
//! - **store**: the [`store::Store`] trait and its SQLite implementation
//! - **sync**: the synchronization algorithm
//! - **feed**: RSS and Atom serialization
//! - **routes**: the axum HTTP surface

pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
mod http;
pub mod model;
mod routes;
pub mod state;
pub mod store;
pub mod sync;

use axum::Router;
use axum::http::Request;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Level;

pub use self::config::Config;
pub use self::routes::router;
pub use self::state::AppState;

/// The router wrapped in request tracing.
pub fn app(state: AppState) -> Router {
    router(state).layer(
        TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            tracing::span!(
                Level::INFO,
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                query = request.uri().query().unwrap_or("")
            )
        }),
    )
}

pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "starting server");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
