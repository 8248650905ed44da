//! Query-side retrieval.
//!
//! Embeds a question in query mode and ranks indexed chunks against it. If
//! query embedding or the vector search fails, the question is searched
//! again through the index's text path (document-mode embedding) before
//! giving up.

use serde::Serialize;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::vector_index::{SearchHit, VectorIndex};

/// A chunk returned for a query, with attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub doc_id: String,
    pub filename: String,
    pub chunk_id: String,
    pub score: f32,
    pub rank: usize,
}

impl From<SearchHit> for RetrievedChunk {
    fn from(hit: SearchHit) -> Self {
        Self {
            content: hit.text,
            doc_id: hit.metadata.doc_id,
            filename: hit.metadata.filename,
            chunk_id: hit.metadata.chunk_id,
            score: hit.score,
            rank: hit.rank,
        }
    }
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Top-`k` chunks for `query`, best first. Empty when nothing is indexed.
    ///
    /// Only the manifest's presence is checked up front; the search itself
    /// verifies the files and yields nothing for a damaged index.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() || !self.index.has_manifest() {
            return Ok(Vec::new());
        }

        let primary = match self.embedder.embed_query(query).await {
            Ok(vector) => self.index.search_by_vector(&vector, k).await,
            Err(e) => Err(e),
        };

        let hits = match primary {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("query-mode retrieval failed ({}), retrying via text search", e);
                self.index
                    .search_by_text(query, k, self.embedder.as_ref())
                    .await?
            }
        };

        Ok(hits.into_iter().map(RetrievedChunk::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LexicalProvider;
    use crate::error::ConciergeError;
    use crate::models::ChunkMetadata;
    use crate::vector_index::IndexEntry;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Lexical vectors for documents; query mode always fails.
    struct BrokenQueryMode(LexicalProvider);

    #[async_trait]
    impl EmbeddingProvider for BrokenQueryMode {
        fn model_name(&self) -> &str {
            "broken-query"
        }
        fn dims(&self) -> usize {
            self.0.dims()
        }
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.0.embed_documents(texts).await
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(ConciergeError::embedding("query endpoint unavailable"))
        }
    }

    /// Every embedding call fails.
    struct Offline;

    #[async_trait]
    impl EmbeddingProvider for Offline {
        fn model_name(&self) -> &str {
            "offline"
        }
        fn dims(&self) -> usize {
            32
        }
        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(ConciergeError::embedding("network unreachable"))
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(ConciergeError::embedding("network unreachable"))
        }
    }

    async fn seeded_index(dir: &std::path::Path, provider: &LexicalProvider) -> Arc<VectorIndex> {
        let index = Arc::new(VectorIndex::new(dir));
        let texts = ["penguins live in antarctica", "volcanoes erupt molten rock"];
        let mut entries = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            entries.push(IndexEntry {
                metadata: ChunkMetadata {
                    chunk_id: format!("d{}_0", i),
                    doc_id: format!("d{}", i),
                    filename: format!("doc{}.txt", i),
                    chunk_index: 0,
                    upload_time: "2024-01-01T00:00:00+00:00".into(),
                },
                text: t.to_string(),
                vector: provider.embed_text(t),
            });
        }
        index.insert(entries, "lexical-hash").await.unwrap();
        index
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let retriever = Retriever::new(
            Arc::new(LexicalProvider::new(32)),
            Arc::new(VectorIndex::new(tmp.path())),
        );
        assert!(retriever.retrieve("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_manifest_skips_embedding() {
        let tmp = TempDir::new().unwrap();
        let retriever = Retriever::new(
            Arc::new(Offline),
            Arc::new(VectorIndex::new(tmp.path())),
        );
        assert!(retriever.retrieve("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn damaged_index_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let provider = LexicalProvider::new(64);
        let index = seeded_index(tmp.path(), &provider).await;
        std::fs::write(tmp.path().join("vectors-1.bin"), b"junk").unwrap();
        let retriever = Retriever::new(Arc::new(LexicalProvider::new(64)), index);
        assert!(retriever.retrieve("penguins", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn best_match_comes_first() {
        let tmp = TempDir::new().unwrap();
        let provider = LexicalProvider::new(128);
        let index = seeded_index(tmp.path(), &provider).await;
        let retriever = Retriever::new(Arc::new(LexicalProvider::new(128)), index);
        let hits = retriever.retrieve("where do penguins live", 2).await.unwrap();
        assert_eq!(hits[0].filename, "doc0.txt");
        assert_eq!(hits[0].rank, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn falls_back_to_text_search() {
        let tmp = TempDir::new().unwrap();
        let provider = LexicalProvider::new(128);
        let index = seeded_index(tmp.path(), &provider).await;
        let retriever = Retriever::new(
            Arc::new(BrokenQueryMode(LexicalProvider::new(128))),
            index,
        );
        let hits = retriever.retrieve("molten rock volcanoes", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "d1");
    }
}
