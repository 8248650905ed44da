//! TOML configuration.
//!
//! Every section has defaults, so an absent configuration file yields a
//! working setup that stores data under `./processed_docs` and talks to the
//! Gemini API. Credentials are never read from the file; they come from the
//! environment (see [`GOOGLE_API_KEY_ENV`] and friends).
//!
//! ```toml
//! [paths]
//! processed_dir = "processed_docs"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "gemini"          # or "lexical" for offline use
//! model = "text-embedding-004"
//! dims = 768
//!
//! [chat]
//! model = "gemini-2.5-flash"
//! temperature = 0.8
//! max_tool_rounds = 8
//!
//! [retrieval]
//! top_k = 3
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{ConciergeError, Result};

/// Credential for the Gemini chat model and embedding API.
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";
/// Credential for the SerpAPI-backed web search tool.
pub const SERPAPI_API_KEY_ENV: &str = "SERPAPI_API_KEY";
/// Optional credential for live weather lookups.
pub const OPENWEATHERMAP_API_KEY_ENV: &str = "OPENWEATHERMAP_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            processed_dir: default_processed_dir(),
        }
    }
}

impl PathsConfig {
    /// Whole-collection snapshot of the document registry.
    pub fn document_index(&self) -> PathBuf {
        self.processed_dir.join("document_index.json")
    }

    /// Directory holding the vector-index manifest and vector file.
    pub fn vector_index_dir(&self) -> PathBuf {
        self.processed_dir.join("vector_index")
    }
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed_docs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Override for the Gemini API base URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on tool-dispatch round trips within one user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces the built-in system instruction when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tool_rounds: default_max_tool_rounds(),
            timeout_secs: default_chat_timeout_secs(),
            system_prompt: None,
            url: None,
        }
    }
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tool_rounds() -> usize {
    8
}
fn default_chat_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Cap on organic web results passed back to the model.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_serpapi_url")]
    pub serpapi_url: String,
    #[serde(default = "default_openweathermap_url")]
    pub openweathermap_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            max_results: default_max_results(),
            serpapi_url: default_serpapi_url(),
            openweathermap_url: default_openweathermap_url(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_max_results() -> usize {
    8
}
fn default_serpapi_url() -> String {
    "https://serpapi.com/search.json".to_string()
}
fn default_openweathermap_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load and validate configuration.
///
/// A missing file is not an error: defaults are used. A file that exists but
/// cannot be parsed, or that fails validation, is a
/// [`ConciergeError::Configuration`].
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConciergeError::configuration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Parse configuration text without validating it.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| ConciergeError::configuration(format!("failed to parse config file: {}", e)))
}

/// Check cross-field invariants.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(ConciergeError::configuration("chunking.chunk_size must be > 0"));
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return Err(ConciergeError::configuration(
            "chunking.chunk_overlap must be smaller than chunking.chunk_size",
        ));
    }
    if config.retrieval.top_k == 0 {
        return Err(ConciergeError::configuration("retrieval.top_k must be >= 1"));
    }
    if config.embedding.dims == 0 {
        return Err(ConciergeError::configuration("embedding.dims must be > 0"));
    }
    if config.embedding.batch_size == 0 {
        return Err(ConciergeError::configuration("embedding.batch_size must be > 0"));
    }
    if config.chat.max_tool_rounds == 0 {
        return Err(ConciergeError::configuration("chat.max_tool_rounds must be >= 1"));
    }

    match config.embedding.provider.as_str() {
        "gemini" | "lexical" => {}
        other => {
            return Err(ConciergeError::configuration(format!(
                "unknown embedding provider: '{}'. Must be gemini or lexical.",
                other
            )))
        }
    }

    Ok(())
}

/// Read a credential from the environment, treating blank values as unset.
pub fn credential(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
