//! Remote reads against the channel source.
//!
//! The synchronizer only sees the [`Fetcher`] trait; [`TelegramFetcher`]
//! is the adapter that scrapes the public `t.me` web preview.

mod telegram;

use chrono::{DateTime, Utc};

pub use self::telegram::TelegramFetcher;

/// Metadata and newest message id read from a channel's listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHead {
    pub title: String,
    pub description: String,
    pub link: String,
    pub head_id: u64,
}

/// A single message as published, before it becomes an [`crate::model::NewItem`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedItem {
    pub text: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("can't parse page: {0}")]
    Parse(String),

    /// The source marks the message as deleted or private.
    #[error("message unavailable: {0}")]
    Unavailable(String),
}

/// Blocking, single-shot reads. Implementations never retry.
pub trait Fetcher {
    fn fetch_channel_head(&self, name: &str) -> Result<ChannelHead, FetchError>;

    fn fetch_item(&self, name: &str, id: u64) -> Result<FetchedItem, FetchError>;
}
