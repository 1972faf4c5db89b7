//! Persistence of channels and their mirrored items.

pub mod schema;
mod sqlite;

use crate::model::{Channel, Item, NewChannel, NewItem};

pub use self::sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad stored timestamp: {0}")]
    Timestamp(String),
}

pub trait Store {
    fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError>;

    /// Inserts a channel with no cursor and returns it with its assigned id.
    fn create_channel(&self, channel: &NewChannel) -> Result<Channel, StoreError>;

    /// Raises the channel's cursor to `cursor`; a lower value leaves it unchanged.
    fn update_cursor(&self, channel_id: i64, cursor: u64) -> Result<(), StoreError>;

    /// Up to `limit` items, newest `created_at` first.
    fn list_recent_items(&self, channel_id: i64, limit: usize) -> Result<Vec<Item>, StoreError>;

    /// Persists all of `items` or none of them. The result keeps input order.
    fn append_items(&self, channel_id: i64, items: &[NewItem]) -> Result<Vec<Item>, StoreError>;
}
