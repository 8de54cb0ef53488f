//! Memo of completed per-file fetches for one loaded changeset.
//!
//! Keys combine the file index, the ordered flag list and the normalize flag.
//! Entries are only ever dropped all at once via [`UnifiedDataCache::clear`].
//! There is no request de-duplication: two concurrent misses on one key both
//! hit the network and the later completion overwrites the earlier entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::errors::SessionResult;
use crate::fetcher::UnifiedFileFetcher;
use crate::server::{FileIndexRef, UnifiedFileData};

/// Composite cache key of one fetch.
pub fn cache_key(index: FileIndexRef, flags: &[String], normalize_json: bool) -> String {
    format!("{index}|{}|{}", flags.join(","), u8::from(normalize_json))
}

/// Cache in front of a [`UnifiedFileFetcher`].
pub struct UnifiedDataCache {
    fetcher: UnifiedFileFetcher,
    entries: Mutex<HashMap<String, Arc<UnifiedFileData>>>,
}

impl UnifiedDataCache {
    pub fn new(fetcher: UnifiedFileFetcher) -> Self {
        Self {
            fetcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped fetcher, for requests that must bypass the memo.
    pub fn fetcher(&self) -> &UnifiedFileFetcher {
        &self.fetcher
    }

    /// Returns the memoized payload or fetches (always with truncation
    /// enabled) and stores it.
    ///
    /// Failures are returned to the caller and never stored, so the next
    /// call retries against the network.
    pub async fn get_or_fetch(
        &self,
        index: FileIndexRef,
        flags: &[String],
        normalize_json: bool,
    ) -> SessionResult<Arc<UnifiedFileData>> {
        let key = cache_key(index, flags, normalize_json);

        let hit = self.lock().get(&key).cloned();
        if let Some(hit) = hit {
            trace!(%key, "file cache hit");
            return Ok(hit);
        }

        debug!(%key, "file cache miss");
        let data = Arc::new(
            self.fetcher
                .fetch(index, flags, normalize_json, false)
                .await?,
        );
        self.lock().insert(key, data.clone());
        Ok(data)
    }

    /// Completed entry for the key, if any.
    pub fn get(
        &self,
        index: FileIndexRef,
        flags: &[String],
        normalize_json: bool,
    ) -> Option<Arc<UnifiedFileData>> {
        self.lock()
            .get(&cache_key(index, flags, normalize_json))
            .cloned()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut entries = self.lock();
        debug!(dropped = entries.len(), "clearing file cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<UnifiedFileData>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
