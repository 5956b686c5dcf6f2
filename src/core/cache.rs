// src/core/cache.rs

use crate::models::Options;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Bumped whenever the on-disk layout of the cache file changes.
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Filesystem Error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode response cache: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),
    #[error("Failed to serialize fingerprint input: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to replace cache file '{path}': {source}")]
    Persist {
        path: String,
        #[source]
        source: tempfile::PersistError,
    },
}

/// A content-addressed cache key: the hex blake3 digest of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `(model, prompt, options)`.
    ///
    /// The input is serialized as JSON before hashing. `Options` is a sorted map,
    /// so the digest does not depend on the order options were supplied in.
    pub fn of(model: &str, prompt: &str, options: &Options) -> Result<Self, CacheError> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            model: &'a str,
            prompt: &'a str,
            options: &'a Options,
        }

        let bytes = serde_json::to_vec(&Canonical {
            model,
            prompt,
            options,
        })?;
        Ok(Self(hex::encode(blake3::hash(&bytes).as_bytes())))
    }

    /// The hex form of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The serialized body of the cache file.
#[derive(Serialize, Deserialize, Debug, Default)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, String>,
    /// Keys written during this run; they win over the disk contents on flush.
    written: HashSet<String>,
}

/// Persistent fingerprint -> response text store.
///
/// One instance is opened per run and shared by every prompt filter and pending
/// completion. All access goes through an internal mutex. Writes stay in memory
/// until [`ResponseCache::flush`].
#[derive(Debug)]
pub struct ResponseCache {
    path: PathBuf,
    state: Mutex<CacheState>,
    bypass_reads: AtomicBool,
}

impl ResponseCache {
    /// Opens the cache stored at `path`. A missing file yields an empty cache.
    ///
    /// A file that cannot be decoded is logged and ignored; it will be replaced
    /// on the next flush.
    pub fn open(path: &Path) -> Self {
        let entries = match read_cache_file(path) {
            Ok(Some(file)) => file.entries,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(
                    "Ignoring unreadable response cache '{}': {}",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };
        debug!(
            "Opened response cache '{}' with {} entries",
            path.display(),
            entries.len()
        );
        Self {
            path: path.to_path_buf(),
            state: Mutex::new(CacheState {
                entries,
                written: HashSet::new(),
            }),
            bypass_reads: AtomicBool::new(false),
        }
    }

    /// When enabled, every `get` reports a miss. Writes are unaffected.
    pub fn set_bypass(&self, bypass: bool) {
        self.bypass_reads.store(bypass, Ordering::SeqCst);
    }

    /// Returns the stored text for `key`, or `None` on a miss or while bypassed.
    pub fn get(&self, key: &Fingerprint) -> Option<String> {
        if self.bypass_reads.load(Ordering::SeqCst) {
            trace!("Cache read bypassed for {}", key);
            return None;
        }
        self.lock().entries.get(key.as_str()).cloned()
    }

    /// Stores `text` under `key`. A second write to the same key replaces the first.
    pub fn put(&self, key: &Fingerprint, text: &str) {
        let mut state = self.lock();
        state
            .entries
            .insert(key.as_str().to_string(), text.to_string());
        state.written.insert(key.as_str().to_string());
    }

    /// The number of entries currently held in memory.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes this run's entries to disk.
    ///
    /// The file is re-read first and this run's writes are laid over it, so a
    /// concurrent run's new keys survive. The replacement is atomic: the data
    /// goes to a temporary file in the same directory which is then renamed.
    pub fn flush(&self) -> Result<(), CacheError> {
        let mut state = self.lock();
        if state.written.is_empty() {
            trace!("Response cache unchanged; skipping flush.");
            return Ok(());
        }

        // 1. Merge with whatever is on disk now.
        let mut merged = match read_cache_file(&self.path) {
            Ok(Some(file)) => file.entries,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Overwriting unreadable response cache: {}", e);
                HashMap::new()
            }
        };
        for key in &state.written {
            if let Some(text) = state.entries.get(key) {
                merged.insert(key.clone(), text.clone());
            }
        }

        // 2. Encode and compress.
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: merged,
        };
        let raw = bincode::serde::encode_to_vec(&file, bincode::config::standard())?;
        let compressed = lz4_flex::compress_prepend_size(&raw);

        // 3. Atomically replace the file.
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;
        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        temp.write_all(&compressed).map_err(|e| self.io_error(e))?;
        temp.persist(&self.path).map_err(|e| CacheError::Persist {
            path: self.path.display().to_string(),
            source: e,
        })?;

        debug!(
            "Flushed {} new responses to '{}' ({} bytes)",
            state.written.len(),
            self.path.display(),
            compressed.len()
        );
        state.written.clear();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Reads and decodes the cache file. `Ok(None)` means there is no file yet.
fn read_cache_file(path: &Path) -> anyhow::Result<Option<CacheFile>> {
    use anyhow::{Context, anyhow};

    if !path.exists() {
        return Ok(None);
    }
    let compressed = fs::read(path)
        .with_context(|| format!("Failed to read cache file at '{}'", path.display()))?;
    if compressed.is_empty() {
        return Ok(None);
    }
    let raw = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| anyhow!("Failed to decompress cache file: {}. It might be corrupt.", e))?;
    let (file, _): (CacheFile, usize) =
        bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .context("Failed to deserialize the response cache.")?;
    if file.version != CACHE_FORMAT_VERSION {
        return Err(anyhow!(
            "Cache format version {} is not supported (expected {})",
            file.version,
            CACHE_FORMAT_VERSION
        ));
    }
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn options(pairs: &[(&str, serde_json::Value)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut forward = Options::new();
        forward.insert("temperature".into(), json!(0.2));
        forward.insert("max_tokens".into(), json!(100));

        let mut backward = Options::new();
        backward.insert("max_tokens".into(), json!(100));
        backward.insert("temperature".into(), json!(0.2));

        let a = Fingerprint::of("gpt-4o", "hi", &forward).unwrap();
        let b = Fingerprint::of("gpt-4o", "hi", &backward).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Fingerprint::of("gpt-4o", "hi", &forward).unwrap());
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_for_any_input_change() {
        let base = options(&[("temperature", json!(0.2))]);
        let fp = Fingerprint::of("m", "p", &base).unwrap();

        assert_ne!(fp, Fingerprint::of("m2", "p", &base).unwrap());
        assert_ne!(fp, Fingerprint::of("m", "p2", &base).unwrap());
        assert_ne!(
            fp,
            Fingerprint::of("m", "p", &options(&[("temperature", json!(0.3))])).unwrap()
        );
        // Field boundaries are part of the serialization, so shifting text between fields matters.
        assert_ne!(
            Fingerprint::of("ab", "c", &Options::new()).unwrap(),
            Fingerprint::of("a", "bc", &Options::new()).unwrap()
        );
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("responses.bin"));
        let key = Fingerprint::of("m", "p", &Options::new()).unwrap();

        assert_eq!(cache.get(&key), None);
        cache.put(&key, "first\n  with whitespace  ");
        assert_eq!(cache.get(&key).as_deref(), Some("first\n  with whitespace  "));

        cache.put(&key, "second");
        assert_eq!(cache.get(&key).as_deref(), Some("second"));
    }

    #[test]
    fn test_bypass_hides_reads_but_keeps_writes() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("responses.bin"));
        let key = Fingerprint::of("m", "p", &Options::new()).unwrap();

        cache.set_bypass(true);
        cache.put(&key, "fresh");
        assert_eq!(cache.get(&key), None);

        cache.set_bypass(false);
        assert_eq!(cache.get(&key).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_flush_persists_across_reopen() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("responses.bin");
        let key = Fingerprint::of("m", "p", &Options::new()).unwrap();

        // --- Execute ---
        {
            let cache = ResponseCache::open(&path);
            cache.put(&key, "persisted");
            cache.flush().unwrap();
        }
        let reopened = ResponseCache::open(&path);

        // --- Assert ---
        assert_eq!(reopened.get(&key).as_deref(), Some("persisted"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_flush_merges_concurrent_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responses.bin");
        let key_a = Fingerprint::of("m", "a", &Options::new()).unwrap();
        let key_b = Fingerprint::of("m", "b", &Options::new()).unwrap();

        // Two caches opened before either flushes, as two processes would.
        let first = ResponseCache::open(&path);
        let second = ResponseCache::open(&path);
        first.put(&key_a, "from first");
        second.put(&key_b, "from second");
        first.flush().unwrap();
        second.flush().unwrap();

        let reopened = ResponseCache::open(&path);
        assert_eq!(reopened.get(&key_a).as_deref(), Some("from first"));
        assert_eq!(reopened.get(&key_b).as_deref(), Some("from second"));
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responses.bin");
        fs::write(&path, lz4_flex::compress_prepend_size(b"garbage")).unwrap();

        let cache = ResponseCache::open(&path);
        assert!(cache.is_empty());

        let key = Fingerprint::of("m", "p", &Options::new()).unwrap();
        cache.put(&key, "recovered");
        cache.flush().unwrap();
        assert_eq!(ResponseCache::open(&path).get(&key).as_deref(), Some("recovered"));
    }

    #[test]
    fn test_flush_without_writes_creates_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responses.bin");

        ResponseCache::open(&path).flush().unwrap();
        assert!(!path.exists());
    }
}
