//! Application wiring.
//!
//! [`Concierge`] assembles the components from a [`Config`] and exposes the
//! narrow surface a front end needs: ingest, list documents, stats,
//! retrieve, and chat sessions.
//!
//! Credentials are checked when the corresponding component is built: the
//! embedding provider in [`Concierge::open`] (before any storage is
//! touched), the chat model in [`Concierge::session`].

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::{Agent, Session};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::llm::{ChatModel, GeminiChatModel};
use crate::models::Document;
use crate::registry::DocumentRegistry;
use crate::retrieve::{RetrievedChunk, Retriever};
use crate::stats::{collect_stats, DocumentStats};
use crate::tools::ToolSet;
use crate::vector_index::VectorIndex;

pub struct Concierge {
    config: Config,
    index: Arc<VectorIndex>,
    registry: Arc<Mutex<DocumentRegistry>>,
    ingestor: Ingestor,
    retriever: Retriever,
    tools: Arc<ToolSet>,
}

impl Concierge {
    /// Build from configuration using the configured embedding provider.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::with_embedder(config, embedder)
    }

    /// Build with an explicit embedding provider.
    pub fn with_embedder(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        let index = Arc::new(VectorIndex::new(config.paths.vector_index_dir()));
        let registry = Arc::new(Mutex::new(DocumentRegistry::load(
            config.paths.document_index(),
        )?));

        let ingestor = Ingestor::new(chunker, embedder.clone(), index.clone(), registry.clone());
        let retriever = Retriever::new(embedder, index.clone());
        let tools = Arc::new(ToolSet::standard(
            &config.tools,
            retriever.clone(),
            config.retrieval.top_k,
        ));

        Ok(Self {
            config,
            index,
            registry,
            ingestor,
            retriever,
            tools,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tools(&self) -> Arc<ToolSet> {
        self.tools.clone()
    }

    pub async fn ingest(&self, bytes: &[u8], filename: &str) -> Result<Document> {
        self.ingestor.ingest(bytes, filename).await
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<Document> {
        self.ingestor.ingest_path(path).await
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.ingestor.documents().await
    }

    pub async fn stats(&self) -> DocumentStats {
        let registry = self.registry.lock().await;
        collect_stats(&registry, &self.index).await
    }

    /// Top chunks for `query`; `top_k` defaults to `[retrieval] top_k`.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        self.retriever
            .retrieve(query, top_k.unwrap_or(self.config.retrieval.top_k))
            .await
    }

    /// New chat session backed by the configured Gemini model.
    pub fn session(&self) -> Result<Session> {
        let model = GeminiChatModel::new(&self.config.chat)?;
        Ok(self.session_with_model(Arc::new(model)))
    }

    /// New chat session backed by `model`.
    pub fn session_with_model(&self, model: Arc<dyn ChatModel>) -> Session {
        let agent = Agent::from_config(model, self.tools.clone(), &self.config.chat);
        Session::new(Arc::new(agent))
    }
}
