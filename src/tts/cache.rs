//! Bounded cache of synthesized audio keyed by text and voice

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use lru::LruCache;

/// Default maximum number of cached utterances
pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Cache key: exact text and voice, no normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Text that was synthesized
    pub text: String,
    /// Voice identifier it was synthesized with
    pub voice_id: String,
}

impl CacheKey {
    /// Build a key from text and voice
    #[must_use]
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
        }
    }
}

/// A cached synthesis result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key the audio was synthesized for
    pub key: CacheKey,
    /// Encoded audio returned by the TTS service
    pub audio: Bytes,
    /// Size of `audio` in bytes
    pub size_bytes: usize,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: usize,
}

/// Content-addressed, LRU-bounded audio cache
///
/// A single lock guards the map, so a `put` is never observed half-written.
pub struct SynthesisCache {
    inner: Mutex<Inner>,
    max_entries: NonZeroUsize,
}

impl SynthesisCache {
    /// Create a cache holding at most `max_entries` utterances (minimum 1)
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                total_bytes: 0,
            }),
            max_entries,
        }
    }

    /// Look up audio for a key, marking it most recently used
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.lock().entries.get(key).map(|entry| entry.audio.clone())
    }

    /// Insert audio for a key, evicting the least recently used entry if full
    pub fn put(&self, key: CacheKey, audio: Bytes) {
        let size_bytes = audio.len();
        let entry = CacheEntry {
            key: key.clone(),
            audio,
            size_bytes,
        };

        let mut inner = self.lock();
        let replacing = inner.entries.contains(&key);
        inner.total_bytes += size_bytes;
        // push hands back either the replaced value for this key or the evicted LRU entry
        if let Some((_, displaced)) = inner.entries.push(key, entry) {
            inner.total_bytes -= displaced.size_bytes;
            if !replacing {
                tracing::trace!(
                    voice = %displaced.key.voice_id,
                    bytes = displaced.size_bytes,
                    "evicted least recently used utterance"
                );
            }
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.total_bytes = 0;
        tracing::debug!(dropped, "synthesis cache cleared");
    }

    /// Number of cached utterances
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of cached audio in bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    /// Configured entry bound
    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries.get()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SynthesisCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
