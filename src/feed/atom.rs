use atom_syndication::{ContentBuilder, EntryBuilder, FeedBuilder, LinkBuilder, Text};
use chrono::{DateTime, Utc};

use super::{FeedError, feed_title};
use crate::model::{Channel, Item};

pub fn render(channel: &Channel, items: &[Item]) -> Result<String, FeedError> {
    let updated = items
        .iter()
        .map(|item| item.created_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .fixed_offset();

    let entries: Vec<atom_syndication::Entry> = items
        .iter()
        .map(|item| {
            let created_at = item.created_at.fixed_offset();
            EntryBuilder::default()
                .title(item.header.clone())
                .id(item.link.clone())
                .updated(created_at)
                .published(Some(created_at))
                .links(vec![LinkBuilder::default().href(item.link.clone()).build()])
                .content(Some(
                    ContentBuilder::default()
                        .value(Some(item.content.clone()))
                        .content_type(Some("html".to_string()))
                        .build(),
                ))
                .build()
        })
        .collect();

    let feed = FeedBuilder::default()
        .title(feed_title(channel).to_string())
        .id(channel.link.clone())
        .updated(updated)
        .links(vec![LinkBuilder::default().href(channel.link.clone()).build()])
        .subtitle(Some(Text::plain(channel.description.clone())))
        .entries(entries)
        .build();

    let bytes = feed.write_to(Vec::new())?;
    Ok(String::from_utf8(bytes)?)
}
