//! Content-addressed cache of previously produced PDFs.
//!
//! Entries are keyed by the SHA-256 of the raw input bytes, so byte-identical
//! inputs collide regardless of their file name or declared content type.
//!
//! ## Why a single lock?
//!
//! Every operation is a digest plus a map operation. Contention is negligible
//! next to the engine round-trips the cache saves, so one
//! [`parking_lot::Mutex`] guards the whole structure including the hit/miss
//! counters.
//!
//! ## Persistence
//!
//! [`ContentCache::persistent`] keeps each PDF in `{digest}.pdf` under the
//! cache directory and the timestamps in `cache_index.json`. Both are written
//! through a temp file and renamed into place. A PDF that cannot be written
//! stays in memory only; a PDF that cannot be read back counts as a miss and
//! its entry is dropped.

use crate::config::ServiceConfig;
use crate::error::Mail2PdfError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "cache_index.json";

/// Hex SHA-256 of `content`: the cache key.
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Snapshot returned by [`ContentCache::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from the cache, `0.0..=100.0`.
    pub hit_rate: f64,
    pub ttl_secs: u64,
    pub persistent: bool,
}

#[derive(Debug)]
enum Payload {
    Memory(Vec<u8>),
    /// Bytes live in `{dir}/{key}.pdf`.
    Disk,
}

#[derive(Debug)]
struct CacheEntry {
    created_at: SystemTime,
    payload: Payload,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    /// Digest → creation time in milliseconds since the Unix epoch.
    entries: BTreeMap<String, u64>,
}

/// Shared, process-wide PDF cache.
#[derive(Debug)]
pub struct ContentCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
    dir: Option<PathBuf>,
}

impl ContentCache {
    /// A purely in-memory cache.
    pub fn in_memory(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
            ttl,
            dir: None,
        }
    }

    /// A cache backed by `dir`, reloading whatever a previous process left.
    ///
    /// Expired entries and entries whose PDF file vanished are dropped on
    /// load. Fails only when the directory cannot be created.
    pub fn persistent(
        dir: impl Into<PathBuf>,
        max_entries: usize,
        ttl: Duration,
    ) -> Result<Self, Mail2PdfError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Mail2PdfError::CacheIo {
            path: dir.clone(),
            source: e,
        })?;

        let cache = Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
            ttl,
            dir: Some(dir),
        };
        cache.load_index();
        Ok(cache)
    }

    /// Build the cache described by `config` (persistent when `cache_dir` is set).
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Mail2PdfError> {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        match config.cache_dir {
            Some(ref dir) => Self::persistent(dir, config.cache_max_entries, ttl),
            None => Ok(Self::in_memory(config.cache_max_entries, ttl)),
        }
    }

    /// Look up the PDF previously produced for `content`.
    pub fn get(&self, content: &[u8]) -> Option<Vec<u8>> {
        let key = digest(content);
        let now = SystemTime::now();
        let mut state = self.state.lock();

        let Some(entry) = state.entries.get(&key) else {
            state.misses += 1;
            debug!("Cache miss: {}", short(&key));
            return None;
        };

        if self.is_expired(entry, now) {
            self.remove_entry(&mut state, &key);
            self.save_index(&state);
            state.misses += 1;
            debug!("Cache entry expired: {}", short(&key));
            return None;
        }

        let bytes = match entry.payload {
            Payload::Memory(ref bytes) => Some(bytes.clone()),
            Payload::Disk => self.read_file(&key),
        };

        match bytes {
            Some(bytes) => {
                state.hits += 1;
                debug!("Cache hit: {} ({} bytes)", short(&key), bytes.len());
                Some(bytes)
            }
            None => {
                self.remove_entry(&mut state, &key);
                self.save_index(&state);
                state.misses += 1;
                None
            }
        }
    }

    /// Store `pdf` as the conversion of `content`; returns the digest used.
    ///
    /// Expired entries are swept first. When the cache is still full the
    /// single oldest entry is evicted. Re-putting an existing key replaces
    /// the entry with a fresh timestamp.
    pub fn put(&self, content: &[u8], pdf: &[u8]) -> String {
        let key = digest(content);
        let now = SystemTime::now();
        let mut state = self.state.lock();

        self.sweep(&mut state, now);

        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.max_entries {
                let Some(oldest) = oldest_key(&state.entries) else {
                    break;
                };
                debug!("Cache full, evicting {}", short(&oldest));
                self.remove_entry(&mut state, &oldest);
            }
        }

        let payload = match self.write_file(&key, pdf) {
            Some(()) => Payload::Disk,
            None => Payload::Memory(pdf.to_vec()),
        };
        state.entries.insert(
            key.clone(),
            CacheEntry {
                created_at: now,
                payload,
            },
        );
        self.save_index(&state);

        debug!("Cached PDF: {} ({} bytes)", short(&key), pdf.len());
        key
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            state.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            size: state.entries.len(),
            max_size: self.max_entries,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
            persistent: self.dir.is_some(),
        }
    }

    /// Remove every entry. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            self.remove_entry(&mut state, &key);
        }
        self.save_index(&state);
        info!("PDF cache cleared");
    }

    /// Drop every expired entry now; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        self.sweep(&mut state, SystemTime::now())
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn is_expired(&self, entry: &CacheEntry, now: SystemTime) -> bool {
        now.duration_since(entry.created_at).unwrap_or(Duration::ZERO) > self.ttl
    }

    fn sweep(&self, state: &mut CacheState, now: SystemTime) -> usize {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_entry(state, key);
        }
        if !expired.is_empty() {
            debug!("Swept {} expired cache entries", expired.len());
            self.save_index(state);
        }
        expired.len()
    }

    fn remove_entry(&self, state: &mut CacheState, key: &str) {
        if let Some(entry) = state.entries.remove(key) {
            if let (Payload::Disk, Some(dir)) = (entry.payload, self.dir.as_ref()) {
                let path = pdf_path(dir, key);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to delete cached file {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    fn read_file(&self, key: &str) -> Option<Vec<u8>> {
        let path = pdf_path(self.dir.as_ref()?, key);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to read cached file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_file(&self, key: &str, pdf: &[u8]) -> Option<()> {
        let dir = self.dir.as_ref()?;
        match write_atomic(dir, &pdf_path(dir, key), pdf) {
            Ok(()) => Some(()),
            Err(e) => {
                warn!("Failed to persist cached PDF {}: {}; keeping it in memory", short(key), e);
                None
            }
        }
    }

    fn save_index(&self, state: &CacheState) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };
        let index = IndexFile {
            entries: state
                .entries
                .iter()
                .filter(|(_, e)| matches!(e.payload, Payload::Disk))
                .map(|(k, e)| (k.clone(), to_millis(e.created_at)))
                .collect(),
        };
        let result = serde_json::to_vec_pretty(&index)
            .map_err(std::io::Error::other)
            .and_then(|json| write_atomic(dir, &dir.join(INDEX_FILE), &json));
        if let Err(e) = result {
            warn!("Failed to save cache index: {}", e);
        }
    }

    fn load_index(&self) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };
        let path = dir.join(INDEX_FILE);
        let index: IndexFile = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Ignoring corrupt cache index {}: {}", path.display(), e);
                    IndexFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexFile::default(),
            Err(e) => {
                warn!("Failed to read cache index {}: {}", path.display(), e);
                IndexFile::default()
            }
        };

        let now = SystemTime::now();
        let mut state = self.state.lock();
        for (key, millis) in index.entries {
            let entry = CacheEntry {
                created_at: from_millis(millis),
                payload: Payload::Disk,
            };
            if self.is_expired(&entry, now) || !pdf_path(dir, &key).is_file() {
                let _ = std::fs::remove_file(pdf_path(dir, &key));
                continue;
            }
            state.entries.insert(key, entry);
        }
        while state.entries.len() > self.max_entries {
            let Some(oldest) = oldest_key(&state.entries) else {
                break;
            };
            self.remove_entry(&mut state, &oldest);
        }
        self.save_index(&state);
        info!("Loaded PDF cache index with {} entries", state.entries.len());
    }
}

/// Oldest entry by creation time; ties go to the smallest key.
fn oldest_key(entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
        .iter()
        .min_by(|(ka, a), (kb, b)| a.created_at.cmp(&b.created_at).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.clone())
}

fn pdf_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.pdf"))
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

fn short(key: &str) -> &str {
    &key[..key.len().min(8)]
}
