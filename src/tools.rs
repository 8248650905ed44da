//! Tools the model may invoke, and the set that dispatches them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   ToolSet                    │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────┐ │
//! │  │ web_search │ │ weather_     │ │ search_ │ │
//! │  │ (SerpAPI)  │ │ forecast     │ │documents│ │
//! │  └────────────┘ └──────────────┘ └─────────┘ │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!       invoke(call) ─► ToolPayload  (never fails)
//! ```
//!
//! A [`Tool`] reports failure through `anyhow::Result`; [`ToolSet::invoke`]
//! is the boundary that turns every failure (unknown tool, bad arguments,
//! tool error, timeout) into [`ToolPayload::Error`] so the model sees it as
//! data and can recover.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{credential, ToolsConfig, OPENWEATHERMAP_API_KEY_ENV, SERPAPI_API_KEY_ENV};
use crate::message::{Message, ToolCall, ToolPayload};
use crate::retrieve::Retriever;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A named capability the model can call.
///
/// [`parameters_schema`](Tool::parameters_schema) is a JSON Schema object
/// advertised to the model; `execute` receives the model's arguments
/// unvalidated and must check what it needs.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value>;
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Fetch a non-empty string argument.
fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> anyhow::Result<&'a str> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("missing required string argument '{}'", key),
    }
}

fn single_string_schema(key: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            key: { "type": "string", "description": description }
        },
        "required": [key]
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Tool Set
// ═══════════════════════════════════════════════════════════════════════

pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            timeout,
        }
    }

    /// The three built-in tools, configured from `[tools]` and the
    /// environment.
    pub fn standard(config: &ToolsConfig, retriever: Retriever, top_k: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        let mut set = Self::new(Duration::from_secs(config.timeout_secs));
        set.register(Arc::new(WebSearchTool {
            client: client.clone(),
            api_key: credential(SERPAPI_API_KEY_ENV),
            url: config.serpapi_url.clone(),
            max_results: config.max_results,
        }));
        set.register(Arc::new(WeatherTool {
            client,
            api_key: credential(OPENWEATHERMAP_API_KEY_ENV),
            url: config.openweathermap_url.clone(),
        }));
        set.register(Arc::new(DocumentSearchTool::new(retriever, top_k)));
        set
    }

    /// Register a tool. A later tool with the same name shadows earlier ones.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call. Every failure becomes [`ToolPayload::Error`].
    pub async fn invoke(&self, call: &ToolCall) -> ToolPayload {
        let Some(tool) = self.find(&call.name) else {
            tracing::warn!("model requested unknown tool '{}'", call.name);
            return ToolPayload::Error(format!("unknown tool: {}", call.name));
        };

        match tokio::time::timeout(self.timeout, tool.execute(&call.args)).await {
            Ok(Ok(value)) => {
                tracing::debug!("tool {} ({}) succeeded", call.name, call.id);
                ToolPayload::Success(value)
            }
            Ok(Err(e)) => {
                tracing::warn!("tool {} ({}) failed: {:#}", call.name, call.id, e);
                ToolPayload::Error(format!("{:#}", e))
            }
            Err(_) => {
                tracing::warn!("tool {} ({}) timed out", call.name, call.id);
                ToolPayload::Error(format!(
                    "tool '{}' timed out after {}s",
                    call.name,
                    self.timeout.as_secs()
                ))
            }
        }
    }

    /// Run all calls concurrently; one tool message per call, in request
    /// order.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        join_all(calls.iter().map(|call| async move {
            let payload = self.invoke(call).await;
            Message::tool_result(call, payload)
        }))
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

/// Google results through SerpAPI: the answer box followed by organic
/// results.
pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
    max_results: usize,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns the answer box (if any) followed by organic results with titles, links, and snippets."
    }

    fn parameters_schema(&self) -> Value {
        single_string_schema("query", "Search query")
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = required_str(args, "query")?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} is not set", SERPAPI_API_KEY_ENV))?;

        let response = self
            .client
            .get(&self.url)
            .query(&[("engine", "google"), ("q", query), ("api_key", api_key)])
            .send()
            .await
            .context("web search request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("web search returned HTTP {}", status);
        }
        let data: Value = response
            .json()
            .await
            .context("web search returned malformed JSON")?;
        serp_results(&data, self.max_results)
    }
}

fn serp_results(data: &Value, max_results: usize) -> anyhow::Result<Value> {
    if let Some(err) = data.get("error").and_then(|e| e.as_str()) {
        bail!("SerpAPI error: {}", err);
    }
    let mut results = vec![data.get("answer_box").cloned().unwrap_or_else(|| json!({}))];
    if let Some(organic) = data.get("organic_results").and_then(|o| o.as_array()) {
        results.extend(organic.iter().take(max_results).cloned());
    }
    Ok(Value::Array(results))
}

/// Current conditions from OpenWeatherMap, or a fixed forecast when no key
/// is configured.
pub struct WeatherTool {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather_forecast"
    }

    fn description(&self) -> &str {
        "Get the weather forecast for a location (city name, optionally with country code)."
    }

    fn parameters_schema(&self) -> Value {
        single_string_schema("location", "City or place name, e.g. \"London,GB\"")
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        let location = required_str(args, "location")?;
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(Value::String(stub_forecast(location)));
        };

        let response = self
            .client
            .get(&self.url)
            .query(&[("q", location), ("appid", api_key), ("units", "metric")])
            .send()
            .await
            .context("weather request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("weather service returned HTTP {} for '{}'", status, location);
        }
        let data: Value = response
            .json()
            .await
            .context("weather service returned malformed JSON")?;
        Ok(Value::String(summarize_weather(location, &data)))
    }
}

fn stub_forecast(location: &str) -> String {
    format!("Weather forecast for {}: Sunny with a chance of rain", location)
}

fn summarize_weather(location: &str, data: &Value) -> String {
    let place = data.get("name").and_then(|n| n.as_str()).unwrap_or(location);
    let description = data
        .pointer("/weather/0/description")
        .and_then(|d| d.as_str())
        .unwrap_or("unknown conditions");
    let number = |ptr: &str| data.pointer(ptr).and_then(|v| v.as_f64());

    let mut summary = format!("Weather in {}: {}", place, description);
    if let Some(temp) = number("/main/temp") {
        summary.push_str(&format!(", {:.1}°C", temp));
    }
    if let Some(feels) = number("/main/feels_like") {
        summary.push_str(&format!(" (feels like {:.1}°C)", feels));
    }
    if let Some(humidity) = number("/main/humidity") {
        summary.push_str(&format!(", humidity {:.0}%", humidity));
    }
    if let Some(wind) = number("/wind/speed") {
        summary.push_str(&format!(", wind {:.1} m/s", wind));
    }
    summary
}

pub const NO_DOCUMENTS_MESSAGE: &str = "No relevant documents found for your query. Please make sure you have uploaded documents or try a different search term.";

/// Semantic search over uploaded documents.
///
/// Always succeeds from the tool set's point of view: retrieval failures
/// are reported inside the returned text.
pub struct DocumentSearchTool {
    retriever: Retriever,
    top_k: usize,
}

impl DocumentSearchTool {
    pub fn new(retriever: Retriever, top_k: usize) -> Self {
        Self { retriever, top_k }
    }

    pub async fn search(&self, query: &str) -> String {
        match self.retriever.retrieve(query, self.top_k).await {
            Ok(chunks) if chunks.is_empty() => NO_DOCUMENTS_MESSAGE.to_string(),
            Ok(chunks) => {
                let mut out = format!("Found {} relevant document chunks:\n\n", chunks.len());
                for (i, chunk) in chunks.iter().enumerate() {
                    out.push_str(&format!(
                        "--- Document Chunk {} (from {}) ---\n{}\n\n",
                        i + 1,
                        chunk.filename,
                        chunk.content
                    ));
                }
                out
            }
            Err(e) => {
                tracing::warn!("document search failed: {}", e);
                format!("Error searching documents: {}", e)
            }
        }
    }
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search through documents uploaded by the user (resumes, PDFs, notes, spreadsheets) and return the most relevant passages."
    }

    fn parameters_schema(&self) -> Value {
        single_string_schema("query", "What to look for in the uploaded documents")
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = required_str(args, "query")?;
        Ok(Value::String(self.search(query).await))
    }
}
