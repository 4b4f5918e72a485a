//! Pregenerated audio cache.
//!
//! Fixed phrases are synthesized once and stored as wire-ready mu-law
//! payloads, so speaking a known phrase costs one disk read instead of a TTS
//! round trip. Each provider/voice pair owns a directory:
//!
//! ```text
//! {root}/{provider}/{voice}/index.json   text -> hash
//! {root}/{provider}/{voice}/{hash}.pcm   mu-law payload
//! ```
//!
//! The index is the source of truth. [`AudioCache::synchronize`] reconciles
//! it against the on-disk files and the phrase catalog at startup, and the
//! same routine can run again at any time with an identical outcome.
//!
//! The cache is shared across calls. Entries are immutable once written, so
//! readers need no coordination; writers go through the index lock, which is
//! held across the index file write to keep disk and memory in step.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_128;

use crate::core::tts::{BaseTTS, TTSError};

/// Name of the per-voice index file.
const INDEX_FILENAME: &str = "index.json";

/// Extension of cached audio payload files.
const PAYLOAD_EXT: &str = "pcm";

// =============================================================================
// Errors
// =============================================================================

/// Errors produced by the audio cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A filesystem operation failed.
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The index file exists but could not be parsed.
    #[error("failed to parse cache index {path}: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Synthesis of a missing catalog entry failed.
    #[error("failed to synthesize cache entry: {0}")]
    Synthesis(#[from] TTSError),
}

// =============================================================================
// Sync Report
// =============================================================================

/// Outcome of one [`AudioCache::synchronize`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries that survived reconciliation unchanged.
    pub kept: usize,
    /// Index entries dropped (missing payload file or no longer in catalog).
    pub dropped_entries: usize,
    /// Payload files deleted because no index entry referenced them.
    pub removed_files: usize,
    /// Catalog phrases synthesized because they were absent.
    pub synthesized: usize,
}

// =============================================================================
// Audio Cache
// =============================================================================

/// Disk-backed cache of synthesized phrases for one provider/voice pair.
pub struct AudioCache {
    dir: PathBuf,
    index: Mutex<HashMap<String, String>>,
}

/// Hash used to derive payload file names from phrase text.
fn text_hash(text: &str) -> String {
    let hash = xxh3_128(text.as_bytes());
    format!("{hash:032x}")
}

impl AudioCache {
    /// Open (or create) the cache directory for a provider/voice pair and
    /// load its index.
    pub async fn open(root: &Path, provider: &str, voice: &str) -> Result<Self, CacheError> {
        let dir = root.join(provider).join(voice);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let index_path = dir.join(INDEX_FILENAME);
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| CacheError::Index {
                path: index_path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(CacheError::Io {
                    path: index_path,
                    source: e,
                });
            }
        };

        debug!(dir = %dir.display(), entries = index.len(), "Opened audio cache");

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    /// Reconcile the index, the payload files, and the phrase catalog.
    ///
    /// In order: drop index entries whose payload file is missing, drop
    /// entries for phrases no longer in the catalog, delete payload files no
    /// surviving entry references, then synthesize and store every catalog
    /// phrase still absent. Running the routine twice in a row yields the
    /// same index and the same file set.
    pub async fn synchronize(
        &self,
        catalog: &[String],
        tts: &dyn BaseTTS,
    ) -> Result<SyncReport, CacheError> {
        let mut index = self.index.lock().await;
        let mut report = SyncReport::default();

        let catalog_set: HashSet<&str> = catalog.iter().map(String::as_str).collect();

        // Entries with a missing payload file or a retired phrase go first,
        // so the file scan below sees only hashes worth keeping.
        let mut surviving = HashMap::new();
        for (text, hash) in index.drain() {
            let file_present = tokio::fs::try_exists(self.payload_path(&hash))
                .await
                .unwrap_or(false);
            if file_present && catalog_set.contains(text.as_str()) {
                surviving.insert(text, hash);
            } else {
                report.dropped_entries += 1;
            }
        }
        report.kept = surviving.len();

        let referenced: HashSet<&str> = surviving.values().map(String::as_str).collect();
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !referenced.contains(stem) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove orphaned cache file");
                } else {
                    report.removed_files += 1;
                }
            }
        }

        for text in catalog {
            if surviving.contains_key(text) {
                continue;
            }
            let audio = tts.synthesize_speech_to_bytes(text).await?;
            let hash = text_hash(text);
            let path = self.payload_path(&hash);
            tokio::fs::write(&path, &audio).await.map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            surviving.insert(text.clone(), hash);
            report.synthesized += 1;
        }

        *index = surviving;
        self.persist_index(&index).await?;

        info!(
            kept = report.kept,
            dropped = report.dropped_entries,
            removed_files = report.removed_files,
            synthesized = report.synthesized,
            "Audio cache synchronized"
        );

        Ok(report)
    }

    /// Look up a phrase by exact text match and return its mu-law payload.
    pub async fn get(&self, text: &str) -> Option<Vec<u8>> {
        let hash = self.index.lock().await.get(text).cloned()?;
        let path = self.payload_path(&hash);
        match tokio::fs::read(&path).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cached payload unreadable, treating as miss");
                None
            }
        }
    }

    /// Whether a phrase is present without reading its payload.
    pub async fn contains(&self, text: &str) -> bool {
        self.index.lock().await.contains_key(text)
    }

    /// Store a phrase synthesized at runtime.
    ///
    /// The entry behaves like any other until the next catalog
    /// reconciliation, which drops it again unless the phrase has joined the
    /// catalog by then.
    pub async fn insert_runtime(&self, text: &str, audio: &[u8]) -> Result<(), CacheError> {
        let hash = text_hash(text);
        let path = self.payload_path(&hash);
        tokio::fs::write(&path, audio).await.map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;

        let mut index = self.index.lock().await;
        index.insert(text.to_string(), hash);
        self.persist_index(&index).await
    }

    /// Number of indexed phrases.
    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    /// Whether the index holds no phrases.
    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }

    fn payload_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.{PAYLOAD_EXT}"))
    }

    async fn persist_index(&self, index: &HashMap<String, String>) -> Result<(), CacheError> {
        let path = self.dir.join(INDEX_FILENAME);
        let raw = serde_json::to_string_pretty(index).map_err(|e| CacheError::Index {
            path: path.clone(),
            source: e,
        })?;
        tokio::fs::write(&path, raw).await.map_err(|e| CacheError::Io {
            path,
            source: e,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
