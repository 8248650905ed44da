use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use concierge::agent::{LoopState, StopReason, GIVE_UP_MESSAGE};
use concierge::config::Config;
use concierge::embedding::LexicalProvider;
use concierge::error::Result;
use concierge::llm::ChatModel;
use concierge::message::{Message, ToolCall, ToolPayload};
use concierge::tools::{Tool, ToolDescriptor};
use concierge::Concierge;

/// Replays canned assistant replies and records what it was shown.
struct ScriptedModel {
    script: Mutex<VecDeque<Message>>,
    seen: Mutex<Vec<Vec<Message>>>,
    /// Keep asking for this tool once the script runs out.
    fallback_tool: Option<String>,
}

impl ScriptedModel {
    fn new(script: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            fallback_tool: None,
        }
    }

    fn always_calling(tool: &str) -> Self {
        Self {
            fallback_tool: Some(tool.to_string()),
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn histories(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _system: &str,
        history: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Message> {
        self.seen.lock().unwrap().push(history.to_vec());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(match &self.fallback_tool {
            Some(tool) => assistant_calls(vec![call(
                &format!("auto_{}", history.len()),
                tool,
                json!({"query": "again"}),
            )]),
            None => Message::assistant("(script exhausted)"),
        })
    }
}

/// Records every argument map it is invoked with.
struct RecordingTool {
    name: &'static str,
    invocations: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl RecordingTool {
    fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<Map<String, Value>>>>) {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name,
                invocations: invocations.clone(),
            },
            invocations,
        )
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "records its arguments"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        self.invocations.lock().unwrap().push(args.clone());
        Ok(json!(format!("{} ran", self.name)))
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.as_object().cloned().unwrap_or_default())
}

fn assistant_calls(calls: Vec<ToolCall>) -> Message {
    Message::Assistant {
        content: String::new(),
        tool_calls: calls,
    }
}

fn lexical_app(tmp: &TempDir, max_tool_rounds: usize) -> Concierge {
    let mut config = Config::default();
    config.paths.processed_dir = tmp.path().join("processed_docs");
    config.embedding.provider = "lexical".into();
    config.embedding.dims = 128;
    config.chunking.chunk_size = 300;
    config.chunking.chunk_overlap = 50;
    config.chat.max_tool_rounds = max_tool_rounds;
    Concierge::with_embedder(config, Arc::new(LexicalProvider::new(128))).unwrap()
}

#[tokio::test]
async fn tool_call_then_answer_appends_three_messages() {
    let tmp = TempDir::new().unwrap();
    let app = lexical_app(&tmp, 8);
    let model = Arc::new(ScriptedModel::new(vec![
        assistant_calls(vec![call("call_1", "weather_forecast", json!({"location": "Reykjavik"}))]),
        Message::assistant("Sunny-ish, pack a raincoat."),
    ]));
    let session = app.session_with_model(model.clone());

    let mut appended = Vec::new();
    let outcome = session
        .send_with("weather in Reykjavik?", |m| appended.push(m.clone()))
        .await;

    assert_eq!(outcome.state, LoopState::Done);
    assert_eq!(outcome.stop, StopReason::Answered);
    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(appended.len(), 3);
    assert_eq!(appended[0].role(), "assistant");
    match &appended[1] {
        Message::Tool { call_id, name, payload } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(name, "weather_forecast");
            assert_eq!(
                payload,
                &ToolPayload::Success(json!(
                    "Weather forecast for Reykjavik: Sunny with a chance of rain"
                ))
            );
        }
        other => panic!("expected tool message, got {:?}", other),
    }
    assert_eq!(appended[2], Message::assistant("Sunny-ish, pack a raincoat."));
    assert_eq!(model.calls(), 2);

    let history = session.history().await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[0], Message::user("weather in Reykjavik?"));
    assert!(history.iter().all(|m| m.role() != "system"));
}

#[tokio::test]
async fn arguments_reach_the_tool_unchanged() {
    let tmp = TempDir::new().unwrap();
    let app = lexical_app(&tmp, 8);
    let (recorder, invocations) = RecordingTool::new("web_search");

    let mut tools = concierge::tools::ToolSet::new(std::time::Duration::from_secs(5));
    tools.register(Arc::new(recorder));
    let model = Arc::new(ScriptedModel::new(vec![
        assistant_calls(vec![call("c1", "web_search", json!({"query": "X"}))]),
        Message::assistant("done"),
    ]));
    let agent = concierge::agent::Agent::from_config(model, Arc::new(tools), &app.config().chat);
    let session = concierge::agent::Session::new(Arc::new(agent));

    let mut tool_messages = Vec::new();
    session
        .send_with("search X", |m| {
            if let Message::Tool { call_id, .. } = m {
                tool_messages.push(call_id.clone());
            }
        })
        .await;

    let invocations = invocations.lock().unwrap();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].get("query"), Some(&json!("X")));
    assert_eq!(tool_messages, vec!["c1".to_string()]);
}

#[tokio::test]
async fn parallel_calls_resolve_in_request_order_before_next_model_call() {
    let (search, searches) = RecordingTool::new("web_search");
    let (docs, doc_searches) = RecordingTool::new("search_documents");
    let mut tools = concierge::tools::ToolSet::new(std::time::Duration::from_secs(5));
    tools.register(Arc::new(search));
    tools.register(Arc::new(docs));

    let model = Arc::new(ScriptedModel::new(vec![
        assistant_calls(vec![
            call("w", "web_search", json!({"query": "rust release"})),
            call("d", "search_documents", json!({"query": "rust release"})),
        ]),
        Message::assistant("both checked"),
    ]));
    let agent = concierge::agent::Agent::new(model.clone(), Arc::new(tools));
    let session = concierge::agent::Session::new(Arc::new(agent));
    session.send_with("when is the next rust release?", |_| {}).await;

    assert_eq!(searches.lock().unwrap().len(), 1);
    assert_eq!(doc_searches.lock().unwrap().len(), 1);

    let histories = model.histories();
    assert_eq!(histories.len(), 2);
    let second = &histories[1];
    assert_eq!(second.len(), 4);
    let ids: Vec<&str> = second[2..]
        .iter()
        .map(|m| match m {
            Message::Tool { call_id, .. } => call_id.as_str(),
            _ => "not a tool message",
        })
        .collect();
    assert_eq!(ids, vec!["w", "d"]);
}

#[tokio::test]
async fn always_calling_model_stops_at_round_budget() {
    let (search, searches) = RecordingTool::new("web_search");
    let mut tools = concierge::tools::ToolSet::new(std::time::Duration::from_secs(5));
    tools.register(Arc::new(search));

    let model = Arc::new(ScriptedModel::always_calling("web_search"));
    let agent = concierge::agent::Agent::new(model.clone(), Arc::new(tools)).with_max_tool_rounds(3);
    let session = concierge::agent::Session::new(Arc::new(agent));

    let outcome = session.send_with("loop please", |_| {}).await;
    assert_eq!(outcome.stop, StopReason::BudgetExhausted);
    assert_eq!(outcome.tool_rounds, 3);
    assert_eq!(searches.lock().unwrap().len(), 3);
    assert_eq!(model.calls(), 4);

    let history = session.history().await;
    assert_eq!(history.last(), Some(&Message::assistant(GIVE_UP_MESSAGE)));

    // Every call carried by an assistant message has a matching tool message.
    for (i, m) in history.iter().enumerate() {
        for c in m.tool_calls() {
            assert!(history[i + 1..].iter().any(|r| matches!(
                r,
                Message::Tool { call_id, .. } if call_id == &c.id
            )));
        }
    }
}

#[tokio::test]
async fn channel_yields_appended_messages_in_order() {
    let tmp = TempDir::new().unwrap();
    let app = lexical_app(&tmp, 8);
    let model = Arc::new(ScriptedModel::new(vec![
        assistant_calls(vec![call("c", "weather_forecast", json!({"location": "Kyoto"}))]),
        Message::assistant("Mild."),
    ]));
    let session = app.session_with_model(model);

    let mut rx = session.send("kyoto weather").await;
    let mut received = Vec::new();
    while let Some(m) = rx.recv().await {
        received.push(m);
    }
    let history = session.history().await;
    assert_eq!(received.len(), 3);
    assert_eq!(&history[1..], received.as_slice());
}

#[tokio::test]
async fn document_search_tool_answers_from_uploads() {
    let tmp = TempDir::new().unwrap();
    let app = lexical_app(&tmp, 8);
    app.ingest(
        b"Maya led the migration of the billing platform to Kubernetes in 2022.",
        "resume.txt",
    )
    .await
    .unwrap();

    let model = Arc::new(ScriptedModel::new(vec![
        assistant_calls(vec![call(
            "s",
            "search_documents",
            json!({"query": "billing platform Kubernetes migration"}),
        )]),
        Message::assistant("According to resume.txt, Maya led it."),
    ]));
    let session = app.session_with_model(model);
    let mut tool_text = String::new();
    session
        .send_with("who migrated billing?", |m| {
            if let Message::Tool { .. } = m {
                tool_text = m.text();
            }
        })
        .await;

    assert!(tool_text.starts_with("Found 1 relevant document chunks:"));
    assert!(tool_text.contains("--- Document Chunk 1 (from resume.txt) ---"));
    assert!(tool_text.contains("billing platform"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_sends_keep_turn_order() {
    for _ in 0..100 {
        let model = Arc::new(ScriptedModel::new(vec![
            Message::assistant("one"),
            Message::assistant("two"),
        ]));
        let tools = Arc::new(concierge::tools::ToolSet::new(std::time::Duration::from_secs(5)));
        let agent = concierge::agent::Agent::new(model, tools);
        let session = concierge::agent::Session::new(Arc::new(agent));

        let mut first = session.send("first").await;
        let mut second = session.send("second").await;
        while first.recv().await.is_some() {}
        while second.recv().await.is_some() {}

        let history = session.history().await;
        assert_eq!(
            history,
            vec![
                Message::user("first"),
                Message::assistant("one"),
                Message::user("second"),
                Message::assistant("two"),
            ]
        );
    }
}
