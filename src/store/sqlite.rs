use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{Store, StoreError, schema};
use crate::model::{Channel, Item, NewChannel, NewItem};

/// [`Store`] backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Timestamp(format!("{raw:?}: {e}")))
}

fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        title: row.get(2)?,
        cursor: row.get(3)?,
        link: row.get(4)?,
        description: row.get(5)?,
    })
}

impl Store for SqliteStore {
    fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError> {
        let conn = self.conn.lock();
        let channel = conn
            .query_row(
                "SELECT id, name, title, cursor, link, description FROM channels WHERE name = ?",
                [name],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    fn create_channel(&self, channel: &NewChannel) -> Result<Channel, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO channels (name, title, cursor, link, description)
             VALUES (?, ?, NULL, ?, ?)",
            params![channel.name, channel.title, channel.link, channel.description],
        )?;

        Ok(Channel {
            id: conn.last_insert_rowid(),
            name: channel.name.clone(),
            title: channel.title.clone(),
            link: channel.link.clone(),
            description: channel.description.clone(),
            cursor: None,
        })
    }

    fn update_cursor(&self, channel_id: i64, cursor: u64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE channels SET cursor = MAX(COALESCE(cursor, 0), ?) WHERE id = ?",
            params![cursor, channel_id],
        )?;
        Ok(())
    }

    fn list_recent_items(&self, channel_id: i64, limit: usize) -> Result<Vec<Item>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, header, content, link, created_at FROM items
             WHERE channel_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(params![channel_id, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, header, content, link, created_at)| {
                Ok(Item {
                    id,
                    channel_id,
                    header,
                    content,
                    link,
                    created_at: decode_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    fn append_items(&self, channel_id: i64, items: &[NewItem]) -> Result<Vec<Item>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut saved = Vec::with_capacity(items.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO items (channel_id, header, content, link, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for item in items {
                stmt.execute(params![
                    channel_id,
                    item.header,
                    item.content,
                    item.link,
                    encode_timestamp(&item.created_at),
                ])?;
                saved.push(Item {
                    id: tx.last_insert_rowid(),
                    channel_id,
                    header: item.header.clone(),
                    content: item.content.clone(),
                    link: item.link.clone(),
                    created_at: item.created_at,
                });
            }
        }

        // dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(saved)
    }
}
