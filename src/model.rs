use chrono::{DateTime, Utc};

use crate::fetch::{ChannelHead, FetchedItem};

const HEADER_CHARACTERS: usize = 100;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub link: String,
    pub description: String,
    /// Highest remote message id known to be synchronized; `None` until the
    /// first stale sync completes.
    pub cursor: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChannel {
    pub name: String,
    pub title: String,
    pub link: String,
    pub description: String,
}

impl NewChannel {
    pub fn from_head(name: &str, head: &ChannelHead) -> Self {
        Self {
            name: name.to_string(),
            title: head.title.clone(),
            link: head.link.clone(),
            description: head.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub channel_id: i64,
    pub header: String,
    pub content: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub header: String,
    pub content: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

impl From<FetchedItem> for NewItem {
    fn from(fetched: FetchedItem) -> Self {
        Self {
            header: header_snippet(&fetched.text),
            content: with_back_link(&fetched.text, &fetched.link),
            link: fetched.link,
            created_at: fetched.created_at,
        }
    }
}

/// First 100 characters of `text` plus an ellipsis, or empty for short texts.
pub fn header_snippet(text: &str) -> String {
    if text.chars().count() <= HEADER_CHARACTERS {
        return String::new();
    }
    let head: String = text.chars().take(HEADER_CHARACTERS).collect();
    format!("{}{}", head.trim_matches(' '), ELLIPSIS)
}

fn with_back_link(text: &str, link: &str) -> String {
    format!("{text}\n\n<a href=\"{link}\">[link]</a>")
}
