//! Document registry.
//!
//! A whole-collection JSON snapshot (`document_index.json`) mapping document
//! id to [`Document`]. It is bookkeeping only: listing, statistics, and
//! attribution. Retrieval never consults it, and it is not transactionally
//! coupled to the vector index.
//!
//! Writes are not internally synchronised. The owner (the ingestion
//! pipeline) keeps the registry behind an async mutex.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::Document;

#[derive(Debug)]
pub struct DocumentRegistry {
    path: PathBuf,
    documents: BTreeMap<String, Document>,
}

impl DocumentRegistry {
    /// Load the snapshot at `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let documents = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, documents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or overwrite by id.
    pub fn put(&mut self, doc_id: impl Into<String>, document: Document) {
        self.documents.insert(doc_id.into(), document);
    }

    pub fn get(&self, doc_id: &str) -> Option<&Document> {
        self.documents.get(doc_id)
    }

    pub fn get_all(&self) -> &BTreeMap<String, Document> {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Sum of chunk counts over all documents.
    pub fn total_chunks(&self) -> usize {
        self.documents.values().map(|d| d.chunk_count).sum()
    }

    /// Write the whole collection to a temp file, then rename it into place.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.documents)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, filename: &str, chunks: usize) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            upload_time: "2024-05-01T12:00:00+00:00".to_string(),
            content: "body".to_string(),
            chunk_count: chunks,
            chunks: Vec::new(),
            metadata: None,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let reg = DocumentRegistry::load(tmp.path().join("document_index.json")).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/document_index.json");
        let mut reg = DocumentRegistry::load(&path).unwrap();
        reg.put("a", doc("a", "a.txt", 2));
        reg.put("b", doc("b", "b.pdf", 3));
        reg.save().unwrap();

        let reloaded = DocumentRegistry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("b").unwrap().filename, "b.pdf");
        assert_eq!(reloaded.total_chunks(), 5);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn put_overwrites_by_id() {
        let tmp = TempDir::new().unwrap();
        let mut reg = DocumentRegistry::load(tmp.path().join("r.json")).unwrap();
        reg.put("a", doc("a", "first.txt", 1));
        reg.put("a", doc("a", "second.txt", 1));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a").unwrap().filename, "second.txt");
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("document_index.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(DocumentRegistry::load(&path).is_err());
    }
}
