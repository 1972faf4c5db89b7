use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};

use super::{ChannelHead, FetchError, FetchedItem, Fetcher};

const MESSAGE: &str = ".tgme_widget_message";
const MESSAGE_ERROR: &str = ".tgme_widget_message_error";
const MESSAGE_TEXT: &str = ".tgme_widget_message_text.js-message_text";
const MESSAGE_DATE: &str = ".tgme_widget_message_date time";
const CHANNEL_TITLE: &str = ".tgme_channel_info_header_title span";
const CHANNEL_DESCRIPTION: &str = ".tgme_channel_info_description";

/// Scrapes the public web preview of a channel (`/s/<name>`) and the embed
/// view of single messages (`/<name>/<id>?embed=1`).
pub struct TelegramFetcher {
    client: reqwest::blocking::Client,
    source: String,
}

impl TelegramFetcher {
    pub fn new(client: reqwest::blocking::Client, source: &str) -> Self {
        Self {
            client,
            source: source.trim_end_matches('/').to_string(),
        }
    }

    fn listing_url(&self, name: &str) -> String {
        format!("{}/s/{}", self.source, name)
    }

    fn item_link(&self, name: &str, id: u64) -> String {
        format!("{}/{}/{}", self.source, name, id)
    }

    fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.text()?)
    }
}

impl Fetcher for TelegramFetcher {
    fn fetch_channel_head(&self, name: &str) -> Result<ChannelHead, FetchError> {
        let url = self.listing_url(name);
        let html = self.get(&url)?;
        parse_listing(&html, &url)
    }

    fn fetch_item(&self, name: &str, id: u64) -> Result<FetchedItem, FetchError> {
        let link = self.item_link(name, id);
        let html = self.get(&format!("{link}?embed=1&mode=tme"))?;
        parse_item(&html, &link)
    }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("bad selector {css}: {e}")))
}

fn first_text(doc: &Html, css: &str) -> Result<String, FetchError> {
    let sel = selector(css)?;
    Ok(doc
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

/// `data-post` carries `<channel>/<id>`.
fn post_id(data_post: &str) -> Option<u64> {
    data_post
        .rsplit_once('/')
        .and_then(|(_, id)| id.trim().parse().ok())
}

/// Text content with `<br>` turned into newlines.
fn message_text(el: ElementRef) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) if element.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out
}

pub(crate) fn parse_listing(html: &str, link: &str) -> Result<ChannelHead, FetchError> {
    let doc = Html::parse_document(html);
    let messages = selector(MESSAGE)?;

    let head_id = doc
        .select(&messages)
        .filter_map(|el| el.value().attr("data-post"))
        .filter_map(post_id)
        .max()
        .ok_or_else(|| FetchError::Parse(format!("no messages on {link}")))?;

    Ok(ChannelHead {
        title: first_text(&doc, CHANNEL_TITLE)?,
        description: first_text(&doc, CHANNEL_DESCRIPTION)?,
        link: link.to_string(),
        head_id,
    })
}

pub(crate) fn parse_item(html: &str, link: &str) -> Result<FetchedItem, FetchError> {
    let doc = Html::parse_document(html);

    let error = first_text(&doc, MESSAGE_ERROR)?;
    if !error.is_empty() {
        return Err(FetchError::Unavailable(error));
    }

    let text_sel = selector(MESSAGE_TEXT)?;
    let text = doc.select(&text_sel).last().map(message_text).unwrap_or_default();

    let date_sel = selector(MESSAGE_DATE)?;
    let mut dates = doc
        .select(&date_sel)
        .filter_map(|el| el.value().attr("datetime"))
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| FetchError::Parse(format!("bad datetime {raw:?} on {link}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    dates.sort();
    dates.dedup();

    let created_at = match dates.as_slice() {
        [date] => *date,
        [] => return Err(FetchError::Parse(format!("no datetime on {link}"))),
        _ => return Err(FetchError::Parse(format!("ambiguous datetime on {link}"))),
    };

    Ok(FetchedItem {
        text,
        link: link.to_string(),
        created_at,
    })
}
