//! Content-addressed memo store for step artifacts.
//!
//! Every entry is keyed by the step name plus a SHA-256 fingerprint of the
//! step's normalized inputs. Each key owns a `OnceCell`, so concurrent callers
//! asking for the same key share a single computation. A computation that
//! fails or is dropped leaves the cell empty so the next caller retries; once
//! no caller holds an empty cell it is removed from the map. Stored entries
//! are never evicted.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub step: String,
    pub fingerprint: String,
}

impl CacheKey {
    /// Builds a key from the step name and its input parts. Parts are
    /// normalized individually, so their boundaries stay significant.
    pub fn new<S: AsRef<str>>(step: &str, parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(normalize_text(part.as_ref()).as_bytes());
            hasher.update([0u8]);
        }
        Self {
            step: step.to_string(),
            fingerprint: format!("{:x}", hasher.finalize()),
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        let (step, fingerprint) = raw
            .split_once(':')
            .ok_or(Error::ParseError(format!("malformed cache key {}", raw)))?;
        Ok(Self {
            step: step.to_string(),
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.step, self.fingerprint)
    }
}

/// Trims and collapses internal whitespace.
pub fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type Slot = Arc<OnceCell<String>>;

/// Releases an empty slot when the lookup holding it ends, whether it
/// returned an error or was dropped mid-computation.
struct SlotGuard<'a> {
    cache: &'a FingerprintCache,
    key: &'a CacheKey,
    slot: Slot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.slot.initialized() {
            self.cache.release(self.key, &self.slot);
        }
    }
}

#[derive(Default)]
pub struct FingerprintCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Slot>> {
        // slots are only ever inserted or replaced whole, a poisoned map is still consistent
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        self.lock().entry(key.clone()).or_default().clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn put(&self, key: CacheKey, artifact: String) {
        self.lock()
            .insert(key, Arc::new(OnceCell::new_with(Some(artifact))));
    }

    /// Returns the cached artifact for `key`, running `compute` on a miss.
    ///
    /// At most one `compute` runs per key at a time; concurrent callers wait
    /// for it and share its result. Errors and empty artifacts are never
    /// stored. The returned flag is true when the artifact came from the cache.
    /// Removes `slot` from the map if it is still empty and no other caller
    /// holds it. Callers only obtain slots under the lock, so the count is exact.
    fn release(&self, key: &CacheKey, slot: &Slot) {
        let mut slots = self.lock();
        let unclaimed = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unclaimed && !slot.initialized() {
            slots.remove(key);
        }
    }

    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<(String, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let guard = SlotGuard {
            cache: self,
            key,
            slot: self.slot(key),
        };

        let mut computed = false;
        let artifact = guard
            .slot
            .get_or_try_init(|| {
                computed = true;
                async move {
                    let artifact = compute().await?;
                    if artifact.trim().is_empty() {
                        return Err(Error::ParseError(format!("empty artifact for {}", key)));
                    }
                    Ok(artifact)
                }
            })
            .await?
            .clone();

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(step = %key.step, fingerprint = %key.fingerprint, "cache hit");
        }

        Ok((artifact, !computed))
    }

    /// Drops every entry whose key fails `keep`, returning how many went.
    pub fn retain<F: Fn(&CacheKey) -> bool>(&self, keep: F) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|key, _| keep(key));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Flat `step:fingerprint -> artifact` mapping of every stored entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .filter_map(|(key, slot)| slot.get().map(|a| (key.to_string(), a.clone())))
            .collect()
    }

    pub fn restore(&self, entries: BTreeMap<String, String>) -> Result<usize> {
        let mut restored = 0;
        for (raw, artifact) in entries {
            if artifact.trim().is_empty() {
                continue;
            }
            self.put(CacheKey::parse(&raw)?, artifact);
            restored += 1;
        }
        Ok(restored)
    }

    pub async fn export(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn import(&self, path: &Path) -> Result<usize> {
        let json = tokio::fs::read_to_string(path).await?;
        self.restore(serde_json::from_str(&json)?)
    }
}
