//! Collection statistics.
//!
//! Summarises what has been ingested: registry counts from the document
//! registry and vector counts from the index. The two numbers come from
//! independent stores and may disagree after an interrupted upload or a
//! deleted index; `concierge stats` shows both so the gap is visible.

use serde::Serialize;
use std::path::Path;

use crate::registry::DocumentRegistry;
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub vector_store_exists: bool,
    /// Number of vectors in the index (0 when absent).
    pub vector_store_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dims: Option<usize>,
}

pub async fn collect_stats(registry: &DocumentRegistry, index: &VectorIndex) -> DocumentStats {
    let index_stats = index.stats().await;
    DocumentStats {
        total_documents: registry.len(),
        total_chunks: registry.total_chunks(),
        vector_store_exists: index_stats.is_some(),
        vector_store_size: index_stats.as_ref().map(|s| s.count).unwrap_or(0),
        embedding_model: index_stats.as_ref().map(|s| s.model.clone()),
        dims: index_stats.map(|s| s.dims),
    }
}

/// Human-readable report for the `stats` command.
pub fn render_stats(stats: &DocumentStats, processed_dir: &Path) -> String {
    let mut out = String::new();
    out.push_str("Concierge Document Stats\n");
    out.push_str("========================\n\n");
    out.push_str(&format!("  Storage:     {}\n", processed_dir.display()));
    out.push_str(&format!("  Size:        {}\n\n", format_bytes(dir_size(processed_dir))));
    out.push_str(&format!("  Documents:   {}\n", stats.total_documents));
    out.push_str(&format!("  Chunks:      {}\n", stats.total_chunks));
    if stats.vector_store_exists {
        out.push_str(&format!(
            "  Vectors:     {} ({}, {}-d)\n",
            stats.vector_store_size,
            stats.embedding_model.as_deref().unwrap_or("unknown"),
            stats.dims.unwrap_or(0)
        ));
    } else {
        out.push_str("  Vectors:     none (no index)\n");
    }
    out
}

/// Total size of regular files directly under `dir` and one level below.
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| match e.metadata() {
            Ok(m) if m.is_dir() => dir_size_flat(&e.path()),
            Ok(m) => m.len(),
            Err(_) => 0,
        })
        .sum()
}

fn dir_size_flat(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
