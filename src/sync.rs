//! Incremental synchronization of a channel into the local store.
//!
//! A sync compares the stored cursor with the remote head id. When they are
//! equal the cache is served as is. Otherwise the missing ids are walked from
//! the head downwards, at most [`MAX_FEED_ITEMS`] messages are collected, the
//! cursor is advanced to the head and the collected messages are appended.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::fetch::{FetchError, Fetcher};
use crate::model::{Channel, Item, NewChannel, NewItem};
use crate::store::{Store, StoreError};

/// Upper bound on items handed to the feed layer.
pub const MAX_FEED_ITEMS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetching channel head failed: {0}")]
    Head(#[source] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Stored cursor equals the remote head; nothing was fetched.
    Fresh,
    Stale { cursor: Option<u64>, head: u64 },
}

/// Outcome of one step of the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Collected(u64),
    /// Fetch failed; the id is not retried on later syncs.
    Skipped { id: u64, reason: String },
    /// Same `created_at` as the previously collected item.
    Duplicate(u64),
}

impl Attempt {
    pub fn id(&self) -> u64 {
        match self {
            Attempt::Collected(id) | Attempt::Duplicate(id) => *id,
            Attempt::Skipped { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub freshness: Freshness,
    pub attempts: Vec<Attempt>,
}

impl SyncReport {
    /// Every id an item fetch was issued for, in walk order.
    pub fn fetched_ids(&self) -> Vec<u64> {
        self.attempts.iter().map(Attempt::id).collect()
    }

    pub fn skipped_ids(&self) -> Vec<u64> {
        self.attempts
            .iter()
            .filter(|a| matches!(a, Attempt::Skipped { .. }))
            .map(Attempt::id)
            .collect()
    }

    pub fn duplicate_ids(&self) -> Vec<u64> {
        self.attempts
            .iter()
            .filter(|a| matches!(a, Attempt::Duplicate(_)))
            .map(Attempt::id)
            .collect()
    }
}

#[derive(Debug)]
pub struct Synced {
    pub channel: Channel,
    /// Newest first. On a stale sync only the items collected by that sync.
    pub items: Vec<Item>,
    pub report: SyncReport,
}

/// One lock per channel name, so two syncs of the same channel never walk
/// and append the same range concurrently. An entry lives only while some
/// sync of that channel holds or waits for it.
#[derive(Default)]
struct ChannelLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChannelLocks {
    fn acquire(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.lock().entry(name.to_string()).or_default().clone()
    }

    /// Hands back a lock taken with [`ChannelLocks::acquire`], dropping the
    /// entry when no other sync references it.
    fn release(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(name);
        }
    }
}

struct Walk {
    collected: Vec<NewItem>,
    attempts: Vec<Attempt>,
}

pub struct Synchronizer<F, S> {
    fetcher: F,
    store: S,
    locks: ChannelLocks,
}

impl<F: Fetcher, S: Store> Synchronizer<F, S> {
    pub fn new(fetcher: F, store: S) -> Self {
        Self {
            fetcher,
            store,
            locks: ChannelLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sync(&self, name: &str) -> Result<Synced, SyncError> {
        let lock = self.locks.acquire(name);
        let result = {
            let _guard = lock.lock();
            self.sync_locked(name)
        };
        self.locks.release(name, lock);
        result
    }

    fn sync_locked(&self, name: &str) -> Result<Synced, SyncError> {
        let head = self
            .fetcher
            .fetch_channel_head(name)
            .map_err(SyncError::Head)?;

        let mut channel = match self.store.get_channel(name)? {
            Some(channel) => channel,
            None => {
                tracing::info!(channel = name, "new channel");
                self.store.create_channel(&NewChannel::from_head(name, &head))?
            }
        };

        if channel.cursor == Some(head.head_id) {
            tracing::debug!(channel = name, head = head.head_id, "cache is fresh");
            let items = self.store.list_recent_items(channel.id, MAX_FEED_ITEMS)?;
            return Ok(Synced {
                channel,
                items,
                report: SyncReport {
                    freshness: Freshness::Fresh,
                    attempts: Vec::new(),
                },
            });
        }

        let freshness = Freshness::Stale {
            cursor: channel.cursor,
            head: head.head_id,
        };
        tracing::info!(
            channel = name,
            cursor = ?channel.cursor,
            head = head.head_id,
            "cache is stale"
        );

        let walk = self.walk(name, head.head_id, channel.cursor.unwrap_or(0));

        // Advance even past skipped ids; they are not revisited.
        let cursor = channel.cursor.map_or(head.head_id, |c| c.max(head.head_id));
        self.store.update_cursor(channel.id, cursor)?;
        channel.cursor = Some(cursor);

        let items = self.store.append_items(channel.id, &walk.collected)?;
        tracing::info!(
            channel = name,
            collected = items.len(),
            attempts = walk.attempts.len(),
            "sync finished"
        );

        Ok(Synced {
            channel,
            items,
            report: SyncReport {
                freshness,
                attempts: walk.attempts,
            },
        })
    }

    /// Fetch ids `head, head - 1, ...` down to but excluding `floor`, until
    /// [`MAX_FEED_ITEMS`] items are collected.
    fn walk(&self, name: &str, head: u64, floor: u64) -> Walk {
        let mut walk = Walk {
            collected: Vec::new(),
            attempts: Vec::new(),
        };

        let mut id = head;
        while id > floor && walk.collected.len() < MAX_FEED_ITEMS {
            let attempt = match self.fetcher.fetch_item(name, id) {
                Err(e) => {
                    tracing::warn!(channel = name, id, error = %e, "skipping message");
                    Attempt::Skipped {
                        id,
                        reason: e.to_string(),
                    }
                }
                Ok(fetched)
                    if walk
                        .collected
                        .last()
                        .is_some_and(|prev| prev.created_at == fetched.created_at) =>
                {
                    tracing::debug!(channel = name, id, "dropping duplicate message");
                    Attempt::Duplicate(id)
                }
                Ok(fetched) => {
                    walk.collected.push(NewItem::from(fetched));
                    Attempt::Collected(id)
                }
            };
            walk.attempts.push(attempt);
            id -= 1;
        }

        walk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ChannelHead, FetchedItem};
    use crate::store::SqliteStore;
    use chrono::{DateTime, TimeZone, Utc};

    /// Serves a fixed head id and a fixed set of messages; every other id
    /// is unavailable. Records the ids it was asked for.
    struct FakeFetcher {
        head: Mutex<Option<u64>>,
        items: Mutex<HashMap<u64, DateTime<Utc>>>,
        calls: Mutex<Vec<u64>>,
    }

    impl FakeFetcher {
        fn new(head: u64) -> Self {
            Self {
                head: Mutex::new(Some(head)),
                items: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_items(self, ids: impl IntoIterator<Item = u64>) -> Self {
            for id in ids {
                self.add(id, minute(id));
            }
            self
        }

        fn add(&self, id: u64, created_at: DateTime<Utc>) {
            self.items.lock().insert(id, created_at);
        }

        fn set_head(&self, head: Option<u64>) {
            *self.head.lock() = head;
        }

        fn take_calls(&self) -> Vec<u64> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch_channel_head(&self, name: &str) -> Result<ChannelHead, FetchError> {
            let head_id = self
                .head
                .lock()
                .ok_or_else(|| FetchError::Parse("no messages".to_string()))?;
            Ok(ChannelHead {
                title: format!("{name} title"),
                description: "desc".to_string(),
                link: format!("https://t.me/s/{name}"),
                head_id,
            })
        }

        fn fetch_item(&self, name: &str, id: u64) -> Result<FetchedItem, FetchError> {
            self.calls.lock().push(id);
            let created_at = self
                .items
                .lock()
                .get(&id)
                .copied()
                .ok_or_else(|| FetchError::Unavailable("Post not found".to_string()))?;
            Ok(FetchedItem {
                text: format!("message {id}"),
                link: format!("https://t.me/{name}/{id}"),
                created_at,
            })
        }
    }

    /// Delegates to a real store but can be told to fail single operations.
    struct FlakyStore {
        inner: SqliteStore,
        fail_creates: Mutex<bool>,
        fail_lists: Mutex<bool>,
        fail_appends: Mutex<bool>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                fail_creates: Mutex::new(false),
                fail_lists: Mutex::new(false),
                fail_appends: Mutex::new(false),
            }
        }
    }

    fn disk_full() -> StoreError {
        StoreError::Io(std::io::Error::other("disk full"))
    }

    impl Store for FlakyStore {
        fn get_channel(&self, name: &str) -> Result<Option<Channel>, StoreError> {
            self.inner.get_channel(name)
        }
        fn create_channel(&self, channel: &NewChannel) -> Result<Channel, StoreError> {
            if *self.fail_creates.lock() {
                return Err(disk_full());
            }
            self.inner.create_channel(channel)
        }
        fn update_cursor(&self, channel_id: i64, cursor: u64) -> Result<(), StoreError> {
            self.inner.update_cursor(channel_id, cursor)
        }
        fn list_recent_items(&self, channel_id: i64, limit: usize) -> Result<Vec<Item>, StoreError> {
            if *self.fail_lists.lock() {
                return Err(disk_full());
            }
            self.inner.list_recent_items(channel_id, limit)
        }
        fn append_items(&self, channel_id: i64, items: &[NewItem]) -> Result<Vec<Item>, StoreError> {
            if *self.fail_appends.lock() {
                return Err(disk_full());
            }
            self.inner.append_items(channel_id, items)
        }
    }

    fn minute(id: u64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(id as i64)
    }

    fn synchronizer(fetcher: FakeFetcher) -> Synchronizer<FakeFetcher, SqliteStore> {
        Synchronizer::new(fetcher, SqliteStore::open_in_memory().unwrap())
    }

    fn links(items: &[Item]) -> Vec<String> {
        items.iter().map(|i| i.link.clone()).collect()
    }

    #[test]
    fn test_first_sync_returns_newest_items() {
        // head 293, only the 5 newest messages still exist
        let sync = synchronizer(FakeFetcher::new(293).with_items(289..=293));

        let synced = sync.sync("lexfridman").unwrap();

        assert_eq!(synced.items.len(), 5);
        assert_eq!(
            links(&synced.items),
            (289..=293)
                .rev()
                .map(|id| format!("https://t.me/lexfridman/{id}"))
                .collect::<Vec<_>>()
        );
        assert_eq!(synced.channel.cursor, Some(293));
        assert_eq!(
            sync.store().get_channel("lexfridman").unwrap().unwrap().cursor,
            Some(293)
        );
        assert_eq!(
            synced.report.freshness,
            Freshness::Stale {
                cursor: None,
                head: 293
            }
        );
    }

    #[test]
    fn test_first_sync_creates_channel_from_head() {
        let sync = synchronizer(FakeFetcher::new(3).with_items(1..=3));
        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.channel.name, "chan");
        assert_eq!(synced.channel.title, "chan title");
        assert_eq!(synced.channel.link, "https://t.me/s/chan");
        assert_eq!(synced.channel.description, "desc");
    }

    #[test]
    fn test_walk_stops_at_cap() {
        let sync = synchronizer(FakeFetcher::new(100).with_items(1..=100));

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.items.len(), MAX_FEED_ITEMS);
        assert_eq!(synced.report.fetched_ids(), (81..=100).rev().collect::<Vec<_>>());
        assert_eq!(synced.channel.cursor, Some(100));
    }

    #[test]
    fn test_walk_stops_at_zero() {
        let sync = synchronizer(FakeFetcher::new(3).with_items(1..=3));

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.report.fetched_ids(), vec![3, 2, 1]);
        assert_eq!(synced.items.len(), 3);
    }

    #[test]
    fn test_fresh_cache_fetches_nothing() {
        let sync = synchronizer(FakeFetcher::new(30).with_items(1..=30));
        sync.sync("chan").unwrap();
        sync.fetcher.take_calls();

        let synced = sync.sync("chan").unwrap();

        assert!(sync.fetcher.take_calls().is_empty());
        assert_eq!(synced.report.freshness, Freshness::Fresh);
        assert_eq!(synced.items.len(), MAX_FEED_ITEMS);
        assert_eq!(synced.items[0].link, "https://t.me/chan/30");
    }

    #[test]
    fn test_fresh_cache_is_bounded_by_store_contents() {
        let sync = synchronizer(FakeFetcher::new(4).with_items(1..=4));
        sync.sync("chan").unwrap();

        let synced = sync.sync("chan").unwrap();
        assert_eq!(synced.report.freshness, Freshness::Fresh);
        assert_eq!(synced.items.len(), 4);
    }

    #[test]
    fn test_stale_sync_never_fetches_at_or_below_cursor() {
        let fetcher = FakeFetcher::new(10).with_items(1..=15);
        let sync = synchronizer(fetcher);
        sync.sync("chan").unwrap();
        sync.fetcher.take_calls();

        sync.fetcher.set_head(Some(15));
        let synced = sync.sync("chan").unwrap();

        assert_eq!(sync.fetcher.take_calls(), vec![15, 14, 13, 12, 11]);
        assert_eq!(synced.channel.cursor, Some(15));
    }

    #[test]
    fn test_stale_sync_returns_only_new_items() {
        let sync = synchronizer(FakeFetcher::new(10).with_items(1..=12));
        sync.sync("chan").unwrap();

        sync.fetcher.set_head(Some(12));
        let synced = sync.sync("chan").unwrap();

        assert_eq!(
            links(&synced.items),
            vec!["https://t.me/chan/12", "https://t.me/chan/11"]
        );
        assert_eq!(
            sync.store().list_recent_items(synced.channel.id, 100).unwrap().len(),
            12
        );
    }

    #[test]
    fn test_failed_fetches_are_skipped_and_not_counted() {
        // 50..=100 exist except every third id
        let fetcher = FakeFetcher::new(100).with_items((50..=100).filter(|id| id % 3 != 0));
        let sync = synchronizer(fetcher);

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.items.len(), MAX_FEED_ITEMS);
        assert!(!synced.report.skipped_ids().is_empty());
        assert!(synced.report.skipped_ids().iter().all(|id| id % 3 == 0));
        assert_eq!(synced.channel.cursor, Some(100));
    }

    #[test]
    fn test_cursor_advances_past_failed_fetches() {
        let sync = synchronizer(FakeFetcher::new(10).with_items([10, 8]));

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.channel.cursor, Some(10));
        assert_eq!(
            synced.report.skipped_ids(),
            vec![9, 7, 6, 5, 4, 3, 2, 1]
        );

        // a message that shows up later below the cursor is never fetched
        sync.fetcher.add(9, minute(9));
        sync.fetcher.take_calls();
        let again = sync.sync("chan").unwrap();
        assert_eq!(again.report.freshness, Freshness::Fresh);
        assert!(sync.fetcher.take_calls().is_empty());
    }

    #[test]
    fn test_adjacent_duplicate_timestamp_is_dropped() {
        let fetcher = FakeFetcher::new(5).with_items(1..=5);
        fetcher.add(4, minute(5));
        let sync = synchronizer(fetcher);

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.report.duplicate_ids(), vec![4]);
        assert_eq!(
            links(&synced.items),
            vec![
                "https://t.me/chan/5",
                "https://t.me/chan/3",
                "https://t.me/chan/2",
                "https://t.me/chan/1"
            ]
        );
    }

    #[test]
    fn test_duplicate_check_looks_past_skipped_ids() {
        // 4 is missing, so 3 is compared against 5
        let fetcher = FakeFetcher::new(5).with_items([5, 3]);
        fetcher.add(3, minute(5));
        let sync = synchronizer(fetcher);

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.report.skipped_ids(), vec![4, 2, 1]);
        assert_eq!(synced.report.duplicate_ids(), vec![3]);
        assert_eq!(synced.items.len(), 1);
    }

    #[test]
    fn test_non_adjacent_equal_timestamps_are_kept() {
        let fetcher = FakeFetcher::new(3).with_items(1..=3);
        fetcher.add(1, minute(3));
        let sync = synchronizer(fetcher);

        let synced = sync.sync("chan").unwrap();

        assert!(synced.report.duplicate_ids().is_empty());
        assert_eq!(synced.items.len(), 3);
    }

    #[test]
    fn test_duplicates_do_not_count_toward_cap() {
        let fetcher = FakeFetcher::new(40).with_items(1..=40);
        fetcher.add(39, minute(40));
        let sync = synchronizer(fetcher);

        let synced = sync.sync("chan").unwrap();

        assert_eq!(synced.items.len(), MAX_FEED_ITEMS);
        assert_eq!(synced.report.fetched_ids().len(), MAX_FEED_ITEMS + 1);
    }

    #[test]
    fn test_head_failure_is_fatal() {
        let fetcher = FakeFetcher::new(1);
        fetcher.set_head(None);
        let sync = synchronizer(fetcher);

        let err = sync.sync("chan").unwrap_err();

        assert!(matches!(err, SyncError::Head(FetchError::Parse(_))));
        assert_eq!(sync.store().get_channel("chan").unwrap(), None);
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let sync = synchronizer(FakeFetcher::new(10).with_items(1..=10));
        sync.sync("chan").unwrap();
        sync.fetcher.take_calls();

        // remote head went down, e.g. newest messages were deleted
        sync.fetcher.set_head(Some(7));
        let synced = sync.sync("chan").unwrap();

        assert!(sync.fetcher.take_calls().is_empty());
        assert!(synced.items.is_empty());
        assert_eq!(synced.channel.cursor, Some(10));
        assert_eq!(sync.store().get_channel("chan").unwrap().unwrap().cursor, Some(10));
    }

    #[test]
    fn test_append_failure_keeps_advanced_cursor() {
        let store = FlakyStore::new();
        *store.fail_appends.lock() = true;
        let sync = Synchronizer::new(FakeFetcher::new(5).with_items(1..=5), store);

        let err = sync.sync("chan").unwrap_err();

        assert!(matches!(err, SyncError::Store(_)));
        let channel = sync.store().get_channel("chan").unwrap().unwrap();
        assert_eq!(channel.cursor, Some(5));

        // the lost batch is not refetched
        *sync.store().fail_appends.lock() = false;
        let synced = sync.sync("chan").unwrap();
        assert_eq!(synced.report.freshness, Freshness::Fresh);
        assert!(synced.items.is_empty());
    }

    #[test]
    fn test_concurrent_syncs_of_same_channel_append_once() {
        let sync = Arc::new(synchronizer(FakeFetcher::new(8).with_items(1..=8)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sync = Arc::clone(&sync);
                std::thread::spawn(move || sync.sync("chan").unwrap().report.freshness)
            })
            .collect();
        let stale = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|f| *f != Freshness::Fresh)
            .count();

        assert_eq!(stale, 1);
        let channel = sync.store().get_channel("chan").unwrap().unwrap();
        assert_eq!(sync.store().list_recent_items(channel.id, 100).unwrap().len(), 8);
    }

    #[test]
    fn test_channel_creation_failure_is_store_error() {
        let store = FlakyStore::new();
        *store.fail_creates.lock() = true;
        let sync = Synchronizer::new(FakeFetcher::new(3).with_items(1..=3), store);

        let err = sync.sync("chan").unwrap_err();

        assert!(matches!(err, SyncError::Store(StoreError::Io(_))));
        assert!(sync.fetcher.take_calls().is_empty());
        assert_eq!(sync.store().get_channel("chan").unwrap(), None);
    }

    #[test]
    fn test_fresh_listing_failure_is_store_error() {
        let sync = Synchronizer::new(FakeFetcher::new(3).with_items(1..=3), FlakyStore::new());
        sync.sync("chan").unwrap();

        *sync.store().fail_lists.lock() = true;
        let err = sync.sync("chan").unwrap_err();

        assert!(matches!(err, SyncError::Store(StoreError::Io(_))));
    }

    #[test]
    fn test_lock_table_is_emptied_after_failed_syncs() {
        let fetcher = FakeFetcher::new(1);
        fetcher.set_head(None);
        let sync = synchronizer(fetcher);

        for i in 0..1000 {
            assert!(sync.sync(&format!("nochan{i}")).is_err());
        }

        assert!(sync.locks.locks.lock().is_empty());
    }

    #[test]
    fn test_lock_table_is_emptied_after_successful_syncs() {
        let sync = Arc::new(synchronizer(FakeFetcher::new(8).with_items(1..=8)));

        let handles: Vec<_> = ["a", "b", "a", "c", "b", "a"]
            .into_iter()
            .map(|name| {
                let sync = Arc::clone(&sync);
                std::thread::spawn(move || sync.sync(name).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(sync.locks.locks.lock().is_empty());
    }
}
