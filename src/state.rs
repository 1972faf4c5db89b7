//! Application state shared by request handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::fetch::TelegramFetcher;
use crate::store::SqliteStore;
use crate::sync::Synchronizer;

pub type ChannelSync = Synchronizer<TelegramFetcher, SqliteStore>;

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<ChannelSync>,
}

impl AppState {
    pub fn new(sync: ChannelSync) -> Self {
        Self {
            sync: Arc::new(sync),
        }
    }

    /// Build the HTTP client and open the store described by `config`.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let client = crate::http::http_client(config.timeout())?;
        let fetcher = TelegramFetcher::new(client, &config.source_url);
        let store = SqliteStore::open(&config.db_path).map_err(|e| {
            anyhow::anyhow!("failed to open database {}: {}", config.db_path.display(), e)
        })?;

        tracing::info!(
            db_path = %config.db_path.display(),
            source_url = %config.source_url,
            timeout_secs = config.timeout_secs,
            "configuration loaded"
        );

        Ok(Self::new(Synchronizer::new(fetcher, store)))
    }
}
