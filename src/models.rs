//! Core data models for the document side of the pipeline.
//!
//! A [`Document`] is what the registry stores and lists; a
//! [`ChunkMetadata`] travels with every vector in the index so that a
//! search hit can be attributed to its source without a registry lookup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `"{doc_id}_{index}"`.
    pub chunk_id: String,
    pub index: usize,
    pub text: String,
}

/// An ingested document. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    /// RFC 3339 timestamp, UTC.
    pub upload_time: String,
    /// Full extracted text (or the extractor's placeholder).
    pub content: String,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Attribution carried by each vector-index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub doc_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub upload_time: String,
}

/// Build the deterministic chunk id for a document and chunk position.
pub fn chunk_id(doc_id: &str, index: usize) -> String {
    format!("{}_{}", doc_id, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_derived_from_doc_and_index() {
        assert_eq!(chunk_id("abc", 0), "abc_0");
        assert_eq!(chunk_id("abc", 12), "abc_12");
        assert_ne!(chunk_id("abc", 1), chunk_id("abd", 1));
    }

    #[test]
    fn document_without_metadata_omits_field() {
        let doc = Document {
            id: "d".into(),
            filename: "notes.txt".into(),
            upload_time: "2024-01-01T00:00:00+00:00".into(),
            content: "hello".into(),
            chunk_count: 0,
            chunks: vec![],
            metadata: None,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("metadata").is_none());
        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
