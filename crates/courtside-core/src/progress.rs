//! Playback progress store
//!
//! Media identifier -> last position, kept in a pluggable key/value backend.
//! Entries are JSON objects and never expire; callers decide when to clear.
//! Backend and decoding failures go to an optional error callback and read
//! as "no progress", so playback carries on without resume.

use crate::types::PlaybackProgress;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default key prefix
pub const DEFAULT_KEY_PREFIX: &str = "courtside";

/// Key/value backend behind the store
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local backend
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryPersistence {
    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Receives persistence failures
pub type PersistenceErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

static GLOBAL: OnceLock<ProgressStore> = OnceLock::new();

/// Saved positions per media identifier
#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn ProgressPersistence>,
    prefix: Arc<str>,
    on_error: Option<PersistenceErrorCallback>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressPersistence>) -> Self {
        Self {
            backend,
            prefix: Arc::from(DEFAULT_KEY_PREFIX),
            on_error: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryPersistence::new()))
    }

    /// Process-wide in-memory store
    pub fn global() -> &'static ProgressStore {
        GLOBAL.get_or_init(ProgressStore::in_memory)
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Arc::from(prefix);
        self
    }

    pub fn with_error_callback(mut self, callback: PersistenceErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// Backend key for a media identifier
    pub fn key(&self, media_id: &str) -> String {
        format!("{}:{}", self.prefix, media_id)
    }

    fn report(&self, err: Error) {
        warn!(error = %err, code = err.error_code(), "Progress persistence failed");
        if let Some(callback) = &self.on_error {
            callback(&err);
        }
    }

    /// Save a position, overwriting any previous one. Returns false if the
    /// write failed.
    pub async fn set_progress(&self, media_id: &str, current_time: f64) -> bool {
        if !current_time.is_finite() {
            self.report(Error::persistence(format!(
                "refusing to store non-finite position for {media_id}"
            )));
            return false;
        }

        let entry = PlaybackProgress {
            current_time,
            last_updated: Utc::now(),
        };
        let result = match serde_json::to_string(&entry) {
            Ok(value) => self.backend.set(&self.key(media_id), value).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                debug!(media_id, current_time, "Progress saved");
                true
            }
            Err(e) => {
                self.report(Error::persistence(e.to_string()));
                false
            }
        }
    }

    /// Saved entry for `media_id`, if any
    pub async fn get_entry(&self, media_id: &str) -> Option<PlaybackProgress> {
        let value = match self.backend.get(&self.key(media_id)).await {
            Ok(value) => value?,
            Err(e) => {
                self.report(Error::persistence(e.to_string()));
                return None;
            }
        };

        match serde_json::from_str::<PlaybackProgress>(&value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                self.report(Error::persistence(format!("corrupt entry for {media_id}: {e}")));
                None
            }
        }
    }

    /// Saved position in seconds for `media_id`, if any
    pub async fn get_progress(&self, media_id: &str) -> Option<f64> {
        self.get_entry(media_id).await.map(|entry| entry.current_time)
    }

    /// Forget the saved position. Returns false if the removal failed.
    pub async fn clear_progress(&self, media_id: &str) -> bool {
        match self.backend.remove(&self.key(media_id)).await {
            Ok(()) => {
                debug!(media_id, "Progress cleared");
                true
            }
            Err(e) => {
                self.report(Error::persistence(e.to_string()));
                false
            }
        }
    }
}
