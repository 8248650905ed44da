//! Persistent brute-force cosine index over chunk embeddings.
//!
//! # On-disk layout
//!
//! ```text
//! <processed_dir>/vector_index/
//! ├── index.json          manifest: format version, model, dims, generation,
//! │                       entry count, SHA-256 of the vector file, and one
//! │                       metadata record (with chunk text) per entry
//! └── vectors-<gen>.bin   row-major little-endian f32, count × dims
//! ```
//!
//! The two files are one logical store. A write lays down a fresh
//! `vectors-<gen+1>.bin`, then renames a temporary manifest over
//! `index.json`. That rename is the commit point; the previous vector file
//! is deleted afterwards. A reader that finds the manifest missing, the
//! vector file missing, or the two disagreeing on length or checksum treats
//! the index as absent and logs why. It never fails hard.
//!
//! # Concurrency
//!
//! One writer at a time (load, merge, save under the write lock); any number
//! of concurrent readers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::embedding::{bytes_to_vec, cosine_similarity, vec_to_bytes, EmbeddingProvider};
use crate::error::{ConciergeError, Result};
use crate::models::ChunkMetadata;

const MANIFEST_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

/// A vector plus the attribution and text it was computed from.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub metadata: ChunkMetadata,
    pub text: String,
    pub vector: Vec<f32>,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity between query and chunk vectors.
    pub score: f32,
    /// 0-based position in the result list.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub dims: usize,
    pub model: String,
    pub generation: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    model: String,
    dims: usize,
    generation: u64,
    count: usize,
    vectors_sha256: String,
    vectors_file: String,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    metadata: ChunkMetadata,
    text: String,
}

/// Fully loaded, verified index contents.
struct Snapshot {
    model: String,
    dims: usize,
    generation: u64,
    vectors_file: String,
    entries: Vec<StoredEntry>,
    /// `entries.len() × dims` values, row-major.
    vectors: Vec<f32>,
}

impl Snapshot {
    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dims..(i + 1) * self.dims]
    }
}

pub struct VectorIndex {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl VectorIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a complete, consistent index is on disk.
    pub async fn exists(&self) -> bool {
        let _guard = self.lock.read().await;
        self.load().await.is_some()
    }

    /// Whether a manifest file is present, without reading or verifying it.
    pub fn has_manifest(&self) -> bool {
        self.dir.join(MANIFEST_FILE).is_file()
    }

    /// Add or replace entries and persist.
    ///
    /// Entries whose chunk id is already indexed replace the old entry in
    /// place; the rest are appended in the given order. Every vector must
    /// match the index dimensionality (or, for a fresh index, the first
    /// entry's). Returns the number of entries after the write.
    pub async fn insert(&self, entries: Vec<IndexEntry>, model: &str) -> Result<usize> {
        let _guard = self.lock.write().await;

        let existing = self.load().await;
        let Some(first) = entries.first() else {
            return Ok(existing.map(|s| s.entries.len()).unwrap_or(0));
        };
        let dims = existing.as_ref().map(|s| s.dims).unwrap_or(first.vector.len());
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dims) {
            return Err(ConciergeError::DimensionMismatch {
                expected: dims,
                actual: bad.vector.len(),
            });
        }

        let mut snapshot = existing.unwrap_or_else(|| Snapshot {
            model: model.to_string(),
            dims,
            generation: 0,
            vectors_file: String::new(),
            entries: Vec::new(),
            vectors: Vec::new(),
        });
        if snapshot.model != model {
            tracing::warn!(
                "inserting {} vectors into an index built with {}",
                model,
                snapshot.model
            );
        }

        let mut positions: HashMap<String, usize> = snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.metadata.chunk_id.clone(), i))
            .collect();

        let mut replaced = 0;
        for entry in entries {
            let stored = StoredEntry {
                metadata: entry.metadata,
                text: entry.text,
            };
            match positions.get(&stored.metadata.chunk_id) {
                Some(&i) => {
                    snapshot.vectors[i * dims..(i + 1) * dims].copy_from_slice(&entry.vector);
                    snapshot.entries[i] = stored;
                    replaced += 1;
                }
                None => {
                    positions.insert(stored.metadata.chunk_id.clone(), snapshot.entries.len());
                    snapshot.vectors.extend_from_slice(&entry.vector);
                    snapshot.entries.push(stored);
                }
            }
        }

        let snapshot = self.persist(snapshot).await?;

        tracing::info!(
            "vector index generation {}: {} entries ({} replaced)",
            snapshot.generation,
            snapshot.entries.len(),
            replaced
        );
        Ok(snapshot.entries.len())
    }

    /// Rank indexed chunks by cosine similarity to `query`.
    ///
    /// Returns at most `k` hits, best first. Equal scores keep insertion
    /// order. An absent index yields no hits.
    pub async fn search_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let _guard = self.lock.read().await;
        let Some(snapshot) = self.load().await else {
            return Ok(Vec::new());
        };
        if query.len() != snapshot.dims {
            return Err(ConciergeError::DimensionMismatch {
                expected: snapshot.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..snapshot.entries.len())
            .map(|i| (i, cosine_similarity(query, snapshot.row(i))))
            .collect();
        // Stable: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(rank, (i, score))| {
                let entry = &snapshot.entries[i];
                SearchHit {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score,
                    rank,
                }
            })
            .collect())
    }

    /// Embed `text` in document mode and search with it.
    pub async fn search_by_text(
        &self,
        text: &str,
        k: usize,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>> {
        let vector = provider
            .embed_documents(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ConciergeError::embedding("empty embedding response"))?;
        self.search_by_vector(&vector, k).await
    }

    pub async fn stats(&self) -> Option<IndexStats> {
        let _guard = self.lock.read().await;
        self.load().await.map(|s| IndexStats {
            count: s.entries.len(),
            dims: s.dims,
            model: s.model,
            generation: s.generation,
        })
    }

    // ============ Persistence ============

    /// Load and verify both files off the async worker threads.
    async fn load(&self) -> Option<Snapshot> {
        let dir = self.dir.clone();
        match tokio::task::spawn_blocking(move || load_snapshot(&dir)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("vector index load task failed: {}", e);
                None
            }
        }
    }

    /// Commit the next generation, then drop the previous vector file.
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<Snapshot> {
            let mut snapshot = snapshot;
            let previous_file = std::mem::take(&mut snapshot.vectors_file);
            persist_snapshot(&dir, &mut snapshot)?;
            if !previous_file.is_empty() && previous_file != snapshot.vectors_file {
                if let Err(e) = std::fs::remove_file(dir.join(&previous_file)) {
                    tracing::warn!("could not remove stale vector file {}: {}", previous_file, e);
                }
            }
            Ok(snapshot)
        })
        .await
        .map_err(|e| ConciergeError::Io(std::io::Error::other(e)))?
    }
}

/// Load and verify both files. Any inconsistency means "no index".
fn load_snapshot(dir: &Path) -> Option<Snapshot> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let raw = match std::fs::read(&manifest_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no vector index at {}", dir.display());
            return None;
        }
        Err(e) => {
            tracing::warn!("cannot read {}: {}", manifest_path.display(), e);
            return None;
        }
    };
    let manifest: Manifest = match serde_json::from_slice(&raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("ignoring unparseable {}: {}", manifest_path.display(), e);
            return None;
        }
    };
    if manifest.version != FORMAT_VERSION {
        tracing::warn!("ignoring vector index with format version {}", manifest.version);
        return None;
    }
    if Path::new(&manifest.vectors_file).file_name().and_then(|n| n.to_str())
        != Some(manifest.vectors_file.as_str())
    {
        tracing::warn!("ignoring vector index with bad file name {:?}", manifest.vectors_file);
        return None;
    }

    let vectors_path = dir.join(&manifest.vectors_file);
    let bytes = match std::fs::read(&vectors_path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(
                "vector index manifest present but {} unreadable: {}; treating index as absent",
                vectors_path.display(),
                e
            );
            return None;
        }
    };

    let Some(expected_len) = manifest
        .count
        .checked_mul(manifest.dims)
        .and_then(|n| n.checked_mul(4))
    else {
        tracing::warn!(
            "vector index manifest claims {} × {} values; treating index as absent",
            manifest.count,
            manifest.dims
        );
        return None;
    };
    if manifest.entries.len() != manifest.count || bytes.len() != expected_len {
        tracing::warn!(
            "vector index inconsistent ({} entries, {} bytes, expected {}); treating index as absent",
            manifest.entries.len(),
            bytes.len(),
            expected_len
        );
        return None;
    }
    if sha256_hex(&bytes) != manifest.vectors_sha256 {
        tracing::warn!("vector file checksum mismatch; treating index as absent");
        return None;
    }

    Some(Snapshot {
        model: manifest.model,
        dims: manifest.dims,
        generation: manifest.generation,
        vectors_file: manifest.vectors_file,
        entries: manifest.entries,
        vectors: bytes_to_vec(&bytes),
    })
}

/// Write the next generation and commit it by renaming the manifest.
fn persist_snapshot(dir: &Path, snapshot: &mut Snapshot) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    snapshot.generation += 1;
    snapshot.vectors_file = format!("vectors-{}.bin", snapshot.generation);

    let bytes = vec_to_bytes(&snapshot.vectors);
    std::fs::write(dir.join(&snapshot.vectors_file), &bytes)?;

    let manifest = Manifest {
        version: FORMAT_VERSION,
        model: snapshot.model.clone(),
        dims: snapshot.dims,
        generation: snapshot.generation,
        count: snapshot.entries.len(),
        vectors_sha256: sha256_hex(&bytes),
        vectors_file: snapshot.vectors_file.clone(),
        entries: snapshot.entries.clone(),
    };
    let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
    std::fs::write(&tmp, serde_json::to_vec(&manifest)?)?;
    std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
