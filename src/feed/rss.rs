use rss::{ChannelBuilder, GuidBuilder, ItemBuilder};

use super::{FeedError, feed_title};
use crate::model::{Channel, Item};

pub fn render(channel: &Channel, items: &[Item]) -> Result<String, FeedError> {
    let items: Vec<rss::Item> = items
        .iter()
        .map(|item| {
            ItemBuilder::default()
                .title(Some(item.header.clone()))
                .link(Some(item.link.clone()))
                .description(Some(item.content.clone()))
                .pub_date(Some(item.created_at.to_rfc2822()))
                .guid(Some(
                    GuidBuilder::default()
                        .value(item.link.clone())
                        .permalink(true)
                        .build(),
                ))
                .build()
        })
        .collect();

    let rss_channel = ChannelBuilder::default()
        .title(feed_title(channel).to_string())
        .link(channel.link.clone())
        .description(channel.description.clone())
        .items(items)
        .build();

    let bytes = rss_channel.write_to(Vec::new())?;
    Ok(String::from_utf8(bytes)?)
}
