//! Ephemeral storage for individually produced PDFs awaiting download.
//!
//! Purely in-process: a restart loses every entry, which is fine because
//! handles are meant to be used within the same short session. Expired
//! entries are swept on the caller's thread before every `put` and `get`,
//! so no background timer is needed.

use crate::config::ServiceConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// One PDF held for later download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPdf {
    pub id: String,
    pub filename: String,
    pub content: Vec<u8>,
    pub created_at: Instant,
}

/// Keyed, TTL-bounded store of [`StoredPdf`]s.
#[derive(Debug)]
pub struct ResultStore {
    entries: Mutex<HashMap<String, StoredPdf>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Duration::from_secs(config.result_ttl_secs),
            config.result_max_entries,
        )
    }

    /// Store `content` under a fresh random id and return the id.
    ///
    /// When the store is full the oldest entry is dropped to make room.
    pub fn put(&self, content: Vec<u8>, filename: impl Into<String>) -> String {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        self.evict_down_to(&mut entries, self.max_entries - 1);
        insert(&mut entries, content, filename.into(), now)
    }

    /// Store every `(content, filename)` pair under one lock, in order.
    ///
    /// Older entries are evicted to make room for the whole batch up front,
    /// so no member of the batch displaces another. `None` (and nothing
    /// stored) when the batch alone is larger than the store.
    pub fn put_all(&self, batch: Vec<(Vec<u8>, String)>) -> Option<Vec<String>> {
        if batch.len() > self.max_entries {
            return None;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        self.evict_down_to(&mut entries, self.max_entries - batch.len());
        Some(
            batch
                .into_iter()
                .map(|(content, filename)| insert(&mut entries, content, filename, now))
                .collect(),
        )
    }

    /// Most entries held at once.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// The entry for `id`, unless it is unknown or older than the TTL.
    pub fn get(&self, id: &str) -> Option<StoredPdf> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        entries.get(id).cloned()
    }

    /// Drop one entry explicitly; returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Number of live entries (expired ones are swept first).
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_down_to(&self, entries: &mut HashMap<String, StoredPdf>, keep: usize) {
        while entries.len() > keep {
            let oldest = entries
                .values()
                .min_by_key(|e| e.created_at)
                .map(|e| e.id.clone());
            match oldest {
                Some(id) => {
                    debug!("Result store full, evicting {}", id);
                    entries.remove(&id);
                }
                None => break,
            }
        }
    }

    fn sweep(&self, entries: &mut HashMap<String, StoredPdf>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.created_at) <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired stored PDFs", removed);
        }
    }
}

fn insert(entries: &mut HashMap<String, StoredPdf>, content: Vec<u8>, filename: String, now: Instant) -> String {
    let id = Uuid::new_v4().to_string();
    entries.insert(
        id.clone(),
        StoredPdf {
            id: id.clone(),
            filename,
            content,
            created_at: now,
        },
    );
    id
}
