//! Validated UI cache.
//!
//! Entries are keyed by normalized URL and validated by content hash on
//! every read, so a stale analysis is never served for a page whose visible
//! text changed. The cache is an optimization, never a correctness gate:
//! load failures produce an empty cache and save failures are logged and
//! swallowed.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::analyzer::PageAnalysis;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub hash: String,
    pub analysis: PageAnalysis,
    pub timestamp: DateTime<Utc>,
    pub hit_count: u64,
    pub last_hit: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_hits: u64,
}

/// Persistent key-value store of page analyses, written through to disk on
/// every mutation and bounded by entry count and age.
#[derive(Debug)]
pub struct UiCache {
    path: Option<PathBuf>,
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    max_age: Duration,
}

impl UiCache {
    /// Open the cache backed by `path`, or an in-memory cache when `path`
    /// is `None`. A missing or unreadable file yields an empty cache.
    pub fn open(path: Option<PathBuf>, max_entries: usize, max_age_hours: i64) -> Self {
        let entries = match &path {
            Some(file) if file.exists() => match Self::read_entries(file) {
                Ok(entries) => {
                    info!("loaded UI cache with {} entries", entries.len());
                    entries
                }
                Err(err) => {
                    warn!("failed to load UI cache from {}: {err}", file.display());
                    HashMap::new()
                }
            },
            _ => HashMap::new(),
        };

        Self {
            path,
            entries,
            max_entries,
            max_age: Duration::hours(max_age_hours),
        }
    }

    fn read_entries(path: &Path) -> Result<HashMap<String, CacheEntry>, io::Error> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(io::Error::other)
    }

    /// Strip query string, fragment, and trailing slashes. Case-preserving.
    pub fn normalize_url(url: &str) -> String {
        let without_query = url.split('?').next().unwrap_or(url);
        let without_fragment = without_query.split('#').next().unwrap_or(without_query);
        without_fragment.trim_end_matches('/').to_string()
    }

    /// Return the stored analysis only when the entry exists, is fresh, and
    /// carries exactly `content_hash`. A hit bumps the entry's hit counters
    /// and tags the returned analysis as cached.
    pub fn get(&mut self, url: &str, content_hash: &str) -> Option<PageAnalysis> {
        let key = Self::normalize_url(url);
        let entry = self.entries.get_mut(&key)?;

        if Utc::now() - entry.timestamp > self.max_age {
            debug!("cache entry expired: {key}");
            return None;
        }
        if entry.hash != content_hash {
            debug!("cache MISS (hash changed): {key}");
            return None;
        }

        entry.hit_count += 1;
        entry.last_hit = Some(Utc::now());
        debug!("cache HIT: {key}");

        let mut analysis = entry.analysis.clone();
        analysis.cached = true;
        Some(analysis)
    }

    /// Write-through insert; overwrites any existing entry for the URL and
    /// resets its hit counters.
    pub fn set(&mut self, url: &str, content_hash: &str, analysis: PageAnalysis) {
        let key = Self::normalize_url(url);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                hash: content_hash.to_string(),
                analysis,
                timestamp: Utc::now(),
                hit_count: 0,
                last_hit: None,
            },
        );
        self.evict_overflow();
        self.save();
        debug!("cached UI for: {key}");
    }

    /// Drop the entry for the URL; no-op when absent.
    pub fn invalidate(&mut self, url: &str) {
        let key = Self::normalize_url(url);
        if self.entries.remove(&key).is_some() {
            self.save();
            info!("invalidated cache for: {key}");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            total_hits: self.entries.values().map(|e| e.hit_count).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_hit.unwrap_or(entry.timestamp))
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    debug!("evicting least-recently-hit cache entry: {key}");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Persist the whole map atomically (write-to-temp then rename). Errors
    /// are logged, never propagated: losing the cache must not fail a task.
    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = self.write_atomic(path) {
            error!("failed to save UI cache to {}: {err}", path.display());
        }
    }

    fn write_atomic(&self, path: &Path) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&tmp, &self.entries).map_err(io::Error::other)?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}
