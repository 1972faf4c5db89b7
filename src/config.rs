use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

/// Serve public Telegram channels as RSS/Atom feeds
#[derive(Parser, Debug, Clone)]
#[command(name = "tgrss", version)]
pub struct Config {
    /// Path to the SQLite database file
    #[arg(long, env = "TGRSS_DB_PATH", default_value = "tg-feeds.db")]
    pub db_path: PathBuf,

    /// Address to listen on
    #[arg(long, env = "TGRSS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "TGRSS_PORT", default_value_t = 4567)]
    pub port: u16,

    /// Base URL of the Telegram web preview
    #[arg(long, env = "TGRSS_SOURCE_URL", default_value = "https://t.me")]
    pub source_url: String,

    /// Timeout for each request to the source, in seconds
    #[arg(long, env = "TGRSS_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl Config {
    /// Checks the source URL and strips its trailing slash.
    pub fn validated(mut self) -> anyhow::Result<Self> {
        let url = Url::parse(&self.source_url)
            .map_err(|e| anyhow::anyhow!("invalid source URL {:?}: {}", self.source_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("source URL must be http or https, got {}", url.scheme());
        }
        self.source_url = self.source_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
