use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::ApiError;
use crate::feed::{self, FeedFormat};
use crate::state::AppState;

const MAX_CHANNEL_NAME: usize = 64;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    format: Option<String>,
}

/// Telegram usernames: ASCII letters, digits and underscores.
fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHANNEL_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sync the channel, then render it.
pub async fn channel_feed(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    if !is_valid_channel_name(&channel) {
        return Err(ApiError::BadRequest(format!("invalid channel name: {channel}")));
    }
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<FeedFormat>().map_err(ApiError::BadRequest)?,
        None => FeedFormat::default(),
    };

    let sync = state.sync.clone();
    let body = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        let synced = sync.sync(&channel)?;
        Ok(feed::render(&synced.channel, &synced.items, format)?)
    })
    .await
    .map_err(|e| anyhow::anyhow!("sync task failed: {}", e))??;

    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}
