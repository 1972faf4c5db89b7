pub mod atom;
pub mod rss;

use std::str::FromStr;

use crate::model::{Channel, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedFormat {
    #[default]
    Rss,
    Atom,
}

impl FeedFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            FeedFormat::Rss => "application/xml",
            FeedFormat::Atom => "application/atom+xml",
        }
    }
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rss" => Ok(FeedFormat::Rss),
            "atom" => Ok(FeedFormat::Atom),
            other => Err(format!("unknown feed format: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("RSS error: {0}")]
    Rss(#[from] ::rss::Error),

    #[error("Atom error: {0}")]
    Atom(#[from] atom_syndication::Error),

    #[error("feed is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Serializes `items` in the order given; nothing is re-sorted.
pub fn render(channel: &Channel, items: &[Item], format: FeedFormat) -> Result<String, FeedError> {
    match format {
        FeedFormat::Rss => self::rss::render(channel, items),
        FeedFormat::Atom => self::atom::render(channel, items),
    }
}

fn feed_title(channel: &Channel) -> &str {
    if channel.title.is_empty() {
        &channel.name
    } else {
        &channel.title
    }
}
