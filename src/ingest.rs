//! Ingestion pipeline orchestration.
//!
//! Coordinates the write path for one upload:
//!
//! ```text
//! bytes ─► extract ─► chunk ─► embed (document mode) ─► vector index
//!                                                        │
//!                                   document registry ◄──┘
//! ```
//!
//! The index is always written before the registry. The two stores have no
//! shared transaction: a crash between the writes leaves searchable chunks
//! without a registry entry, which only affects listing and statistics.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::embedding::EmbeddingProvider;
use crate::error::{ConciergeError, Result};
use crate::extract::extract;
use crate::models::{ChunkMetadata, Document};
use crate::registry::DocumentRegistry;
use crate::vector_index::{IndexEntry, VectorIndex};

pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    registry: Arc<Mutex<DocumentRegistry>>,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        registry: Arc<Mutex<DocumentRegistry>>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            registry,
        }
    }

    /// Ingest one uploaded file and return the stored document.
    ///
    /// Extraction never fails (unreadable input becomes placeholder text).
    /// Embedding and index errors are returned and leave the registry
    /// untouched.
    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> Result<Document> {
        let doc_id = Uuid::new_v4().to_string();
        let upload_time = Utc::now().to_rfc3339();

        let content = extract(bytes, filename);
        let chunks = self.chunker.chunk_document(&doc_id, &content);
        tracing::debug!("{}: {} chars, {} chunks", filename, content.chars().count(), chunks.len());

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_documents(&texts).await?;
            if vectors.len() != chunks.len() {
                return Err(ConciergeError::embedding(format!(
                    "expected {} vectors, got {}",
                    chunks.len(),
                    vectors.len()
                )));
            }

            let entries: Vec<IndexEntry> = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    metadata: ChunkMetadata {
                        chunk_id: chunk.chunk_id.clone(),
                        doc_id: doc_id.clone(),
                        filename: filename.to_string(),
                        chunk_index: chunk.index,
                        upload_time: upload_time.clone(),
                    },
                    text: chunk.text.clone(),
                    vector,
                })
                .collect();
            self.index
                .insert(entries, self.embedder.model_name())
                .await?;
        }

        let document = Document {
            id: doc_id.clone(),
            filename: filename.to_string(),
            upload_time,
            content,
            chunk_count: chunks.len(),
            chunks,
            metadata: None,
        };

        {
            let mut registry = self.registry.lock().await;
            registry.put(doc_id.clone(), document.clone());
            registry.save()?;
        }

        tracing::info!(
            "ingested '{}' as {} ({} chunks)",
            filename,
            doc_id,
            document.chunk_count
        );
        Ok(document)
    }

    /// Read a file from disk and ingest it under its file name.
    pub async fn ingest_path(&self, path: &Path) -> Result<Document> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest(&bytes, &filename).await
    }

    /// Snapshot of all registered documents, oldest upload first.
    pub async fn documents(&self) -> Vec<Document> {
        let registry = self.registry.lock().await;
        let mut docs: Vec<Document> = registry.get_all().values().cloned().collect();
        docs.sort_by(|a, b| a.upload_time.cmp(&b.upload_time));
        docs
    }
}
