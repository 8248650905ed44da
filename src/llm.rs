//! Chat model client.
//!
//! [`ChatModel`] is the seam between the agent loop and a language model:
//! given the system instruction, the conversation so far, and the tools on
//! offer, it returns one assistant message (text, tool calls, or both).
//!
//! [`GeminiChatModel`] implements it over Gemini's `generateContent`:
//!
//! | Conversation | Gemini `contents` |
//! |--------------|-------------------|
//! | `User` | `{"role": "user", "parts": [{"text"}]}` |
//! | `Assistant` | `{"role": "model", "parts": [{"text"}, {"functionCall"}...]}` |
//! | run of `Tool` | one `{"role": "user", "parts": [{"functionResponse"}...]}` |
//! | `System` | not sent (the instruction goes in `systemInstruction`) |

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{credential, ChatConfig, GOOGLE_API_KEY_ENV};
use crate::embedding::GEMINI_BASE_URL;
use crate::error::{ConciergeError, Result};
use crate::message::{Message, ToolCall};
use crate::tools::ToolDescriptor;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the next assistant message. Must return
    /// [`Message::Assistant`].
    async fn complete(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message>;
}

pub struct GeminiChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl GeminiChatModel {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = credential(GOOGLE_API_KEY_ENV).ok_or_else(|| {
            ConciergeError::configuration(format!(
                "{} environment variable not set (required by the chat model)",
                GOOGLE_API_KEY_ENV
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ConciergeError::model)?;
        Ok(Self {
            client,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message> {
        let body = build_request(system, history, tools, self.temperature);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ConciergeError::model)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConciergeError::model(format!(
                "Gemini API error {}: {}",
                status, text
            )));
        }

        let json: Value = response.json().await.map_err(ConciergeError::model)?;
        parse_response(&json)
    }
}

fn build_request(
    system: &str,
    history: &[Message],
    tools: &[ToolDescriptor],
    temperature: f32,
) -> Value {
    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": system }] },
        "contents": to_contents(history),
        "generationConfig": { "temperature": temperature },
    });
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

fn to_contents(history: &[Message]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();
    let mut responses: Vec<Value> = Vec::new();

    let flush = |responses: &mut Vec<Value>, contents: &mut Vec<Value>| {
        if !responses.is_empty() {
            contents.push(json!({ "role": "user", "parts": std::mem::take(responses) }));
        }
    };

    for message in history {
        match message {
            Message::Tool { name, payload, .. } => {
                responses.push(json!({
                    "functionResponse": { "name": name, "response": payload.to_json() }
                }));
            }
            Message::System { .. } => {}
            Message::User { content } => {
                flush(&mut responses, &mut contents);
                contents.push(json!({ "role": "user", "parts": [{ "text": content }] }));
            }
            Message::Assistant {
                content,
                tool_calls,
            } => {
                flush(&mut responses, &mut contents);
                let mut parts = Vec::new();
                if !content.is_empty() {
                    parts.push(json!({ "text": content }));
                }
                for call in tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": call.args }
                    }));
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
        }
    }
    flush(&mut responses, &mut contents);
    contents
}

fn parse_response(json: &Value) -> Result<Message> {
    let Some(candidate) = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        let reason = json
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(ConciergeError::model(format!("empty Gemini response: {}", reason)));
    };

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|p| p.as_slice())
        .unwrap_or(&[]);

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            content.push_str(text);
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| ConciergeError::model("functionCall without a name"))?;
            let id = call
                .get("id")
                .and_then(|i| i.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            let args = match call.get("args") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            tool_calls.push(ToolCall::new(id, name, args));
        }
    }

    Ok(Message::Assistant {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolPayload;

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn tool_results_merge_into_one_user_turn() {
        let history = vec![
            Message::system("ignored"),
            Message::user("weather in Paris and news?"),
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![
                    call("c1", "weather_forecast", json!({"location": "Paris"})),
                    call("c2", "web_search", json!({"query": "news"})),
                ],
            },
            Message::Tool {
                call_id: "c1".into(),
                name: "weather_forecast".into(),
                payload: ToolPayload::Success(json!("sunny")),
            },
            Message::Tool {
                call_id: "c2".into(),
                name: "web_search".into(),
                payload: ToolPayload::Error("no key".into()),
            },
        ];
        let contents = to_contents(&history);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["name"], "web_search");
        assert_eq!(contents[2]["role"], "user");
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["response"], json!({"result": "sunny"}));
        assert_eq!(parts[1]["functionResponse"]["response"], json!({"error": "no key"}));
    }

    #[test]
    fn request_carries_instruction_tools_and_temperature() {
        let tools = vec![ToolDescriptor {
            name: "web_search".into(),
            description: "search".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = build_request("be brief", &[Message::user("hi")], &tools, 0.8);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "web_search");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);

        let bare = build_request("x", &[], &[], 0.2);
        assert!(bare.get("tools").is_none());
    }

    #[test]
    fn parses_text_and_function_calls() {
        let json = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check. "},
                        {"functionCall": {"name": "web_search", "args": {"query": "rust 2024"}}}
                    ]
                }
            }]
        });
        let msg = parse_response(&json).unwrap();
        let Message::Assistant { content, tool_calls } = msg else {
            panic!("expected assistant");
        };
        assert_eq!(content, "Let me check. ");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "web_search");
        assert_eq!(tool_calls[0].args["query"], "rust 2024");
        assert!(tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn blocked_prompt_is_a_model_error() {
        let json = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_response(&json).unwrap_err();
        assert!(matches!(err, ConciergeError::Model(_)));
        assert!(err.to_string().contains("SAFETY"));
    }
}
