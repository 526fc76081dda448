use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::BaseDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::api::ApiClient;
use crate::error::{Error, Result};
use crate::inbox::refresh::{spawn_polling, DEFAULT_POLL_INTERVAL};
use crate::inbox::Inbox;
use crate::storage::{self, SnapshotStore};
use crate::utils::normalize_url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub token: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub cache_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_path: None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

impl Settings {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("inbox-sync.toml"))
    }

    /// Reads the user's config file, then applies `INBOX_SYNC_*` overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::toml_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// A missing file yields defaults; an unreadable one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let mut settings: Settings =
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        if !settings.base_url.is_empty() {
            settings.base_url = normalize_url(&settings.base_url);
        }
        Ok(settings)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("INBOX_SYNC_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = normalize_url(&url);
        }
        if let Some(token) = lookup("INBOX_SYNC_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.token = token.trim().to_string();
        }
    }

    pub fn save(&self) -> Result<()> {
        match Self::toml_path() {
            Some(path) => self.save_to(&path),
            None => Err(Error::Config("no config dir".into())),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("base_url is not set".into()));
        }
        if self.token.trim().is_empty() {
            return Err(Error::Config("token is not set".into()));
        }
        if self.poll_interval_secs == 0 || self.request_timeout_secs == 0 {
            return Err(Error::Config("intervals must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.cache_path.clone().or_else(storage::default_path)
    }
}

fn open_snapshots(settings: &Settings) -> Option<SnapshotStore> {
    let path = settings.snapshot_path()?;
    match SnapshotStore::open(&path) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("snapshot cache unavailable at {}: {}", path.display(), e);
            None
        }
    }
}

/// Keeps the inbox in sync until Ctrl-C, persisting each applied page.
pub async fn run(settings: Settings) -> Result<()> {
    settings.validate()?;
    let client = ApiClient::new(&settings.base_url, settings.token.clone(), settings.request_timeout())?;
    let inbox = Arc::new(Inbox::new(Arc::new(client), settings.request_timeout()));

    let mut snapshots = open_snapshots(&settings);
    if let Some(store) = &snapshots {
        match store.load_page() {
            Ok(Some(page)) => {
                info!("warm start with {} cached conversation(s)", page.conversations.len());
                inbox.warm_start(page);
            }
            Ok(None) => {}
            Err(e) => warn!("ignoring unreadable snapshot: {}", e),
        }
    }

    let mut updates = inbox.subscribe();
    let poller = spawn_polling(inbox.clone(), settings.poll_interval());
    inbox.request_refresh();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.loading {
                    continue;
                }
                let unread: u32 = snapshot.conversations.iter().map(|c| c.unread_count).sum();
                info!(
                    "page {}/{}: {} conversation(s), {} unread, selected {:?}",
                    snapshot.current_page,
                    snapshot.total_pages,
                    snapshot.conversations.len(),
                    unread,
                    snapshot.selected_conversation_id
                );
                if let Some(store) = snapshots.as_mut() {
                    if let Err(e) = store.save_snapshot(&snapshot) {
                        warn!("could not persist snapshot: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    poller.stop();
    Ok(())
}
