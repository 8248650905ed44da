//! Agent loop and conversation sessions.
//!
//! The loop is a three-state machine:
//!
//! ```text
//!            ┌──────────── tool results appended ────────────┐
//!            ▼                                               │
//!   ┌──────────────┐  reply has tool calls  ┌──────────────┐ │
//!   │  MODEL_CALL  │ ─────────────────────► │ TOOL_DISPATCH│─┘
//!   └──────────────┘                        └──────────────┘
//!            │ reply without calls /               │ round budget spent
//!            │ model failure                       ▼
//!            └──────────────────────────────►   DONE
//! ```
//!
//! Every tool call an assistant message carries is answered by exactly one
//! tool message (same `call_id`) before the model runs again, including
//! when the budget is spent: unexecuted calls are then resolved with an
//! error payload before the final give-up message.
//!
//! The system instruction is passed to the model on every call and never
//! stored in the conversation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::config::ChatConfig;
use crate::llm::ChatModel;
use crate::message::{Conversation, Message, ToolPayload};
use crate::tools::ToolSet;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful, tool-first AI assistant that always grounds answers in external data.

- Do not answer factual or time-sensitive questions from internal memory alone. Use tools to fetch up-to-date information.
- Never say that you don't have access to information without first searching the documents or the web. Only after searching may you conclude that you can't answer.
- If a question can be answered using the web, prefer calling the document search and web search tools in parallel.
- When using web or document tools, include concise citations and, when available, source dates or retrieval timestamps for key facts.
- Mark any inference that isn't directly supported by tool output (e.g., \"inferred from X\").
- Keep responses concise, honest, and user-facing. Avoid hallucination.
- Respect privacy and safety: do not fetch or expose private data unless it was explicitly provided in the conversation.

Have a gen-z, curious, lightly skeptical, and forward-thinking tone.";

pub const GIVE_UP_MESSAGE: &str = "I kept reaching for tools without landing on an answer, so I'm stopping here. Try rephrasing or narrowing the question.";

const BUDGET_EXHAUSTED_ERROR: &str = "not executed: tool call budget for this turn is exhausted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    ModelCall,
    ToolDispatch,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model replied without tool calls.
    Answered,
    /// The tool round budget ran out.
    BudgetExhausted,
    /// The model call failed or timed out.
    ModelFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub tool_rounds: usize,
    pub stop: StopReason,
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolSet>,
    system_prompt: String,
    max_tool_rounds: usize,
    model_timeout: Duration,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolSet>) -> Self {
        Self {
            model,
            tools,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_rounds: 8,
            model_timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(model: Arc<dyn ChatModel>, tools: Arc<ToolSet>, config: &ChatConfig) -> Self {
        let mut agent = Self::new(model, tools)
            .with_max_tool_rounds(config.max_tool_rounds)
            .with_model_timeout(Duration::from_secs(config.timeout_secs));
        if let Some(prompt) = &config.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }
        agent
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Drive the loop from `MODEL_CALL` to `DONE`, appending to
    /// `conversation` and reporting each appended message to `observer`.
    pub async fn run<F>(&self, conversation: &mut Conversation, mut observer: F) -> LoopOutcome
    where
        F: FnMut(&Message) + Send,
    {
        let descriptors = self.tools.descriptors();
        let mut append = |conversation: &mut Conversation, message: Message| {
            observer(&message);
            conversation.append(message);
        };

        let mut state = LoopState::ModelCall;
        let mut tool_rounds = 0;
        let mut stop = StopReason::Answered;

        loop {
            match state {
                LoopState::ModelCall => {
                    let reply = tokio::time::timeout(
                        self.model_timeout,
                        self.model
                            .complete(&self.system_prompt, conversation.messages(), &descriptors),
                    )
                    .await;

                    let message = match reply {
                        Ok(Ok(message @ Message::Assistant { .. })) => message,
                        Ok(Ok(other)) => {
                            tracing::warn!("model returned a {} message; ending turn", other.role());
                            append(conversation, failure_message("it replied in an unexpected format"));
                            stop = StopReason::ModelFailed;
                            state = LoopState::Done;
                            continue;
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("model call failed: {}", e);
                            append(conversation, failure_message("the request failed"));
                            stop = StopReason::ModelFailed;
                            state = LoopState::Done;
                            continue;
                        }
                        Err(_) => {
                            tracing::warn!("model call timed out after {:?}", self.model_timeout);
                            append(conversation, failure_message("it took too long to respond"));
                            stop = StopReason::ModelFailed;
                            state = LoopState::Done;
                            continue;
                        }
                    };

                    let has_calls = !message.tool_calls().is_empty();
                    append(conversation, message);
                    state = if has_calls {
                        LoopState::ToolDispatch
                    } else {
                        LoopState::Done
                    };
                }
                LoopState::ToolDispatch => {
                    let calls = conversation
                        .last()
                        .map(|m| m.tool_calls().to_vec())
                        .unwrap_or_default();

                    if tool_rounds >= self.max_tool_rounds {
                        tracing::warn!(
                            "tool round budget ({}) exhausted with {} pending calls",
                            self.max_tool_rounds,
                            calls.len()
                        );
                        for call in &calls {
                            append(
                                conversation,
                                Message::tool_result(
                                    call,
                                    ToolPayload::Error(BUDGET_EXHAUSTED_ERROR.to_string()),
                                ),
                            );
                        }
                        append(conversation, Message::assistant(GIVE_UP_MESSAGE));
                        stop = StopReason::BudgetExhausted;
                        state = LoopState::Done;
                        continue;
                    }

                    tool_rounds += 1;
                    tracing::info!(
                        "tool round {}: {}",
                        tool_rounds,
                        calls
                            .iter()
                            .map(|c| c.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    for result in self.tools.dispatch(&calls).await {
                        append(conversation, result);
                    }
                    state = LoopState::ModelCall;
                }
                LoopState::Done => break,
            }
        }

        LoopOutcome {
            state,
            tool_rounds,
            stop,
        }
    }
}

fn failure_message(reason: &str) -> Message {
    Message::assistant(format!(
        "Sorry, I couldn't get an answer from the language model because {}. Please try again in a moment.",
        reason
    ))
}

/// One conversation. Turns are serialised: a second `send` waits until the
/// previous turn reaches `DONE`.
#[derive(Clone)]
pub struct Session {
    agent: Arc<Agent>,
    conversation: Arc<Mutex<Conversation>>,
}

impl Session {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            conversation: Arc::new(Mutex::new(Conversation::new())),
        }
    }

    /// Append `user_text` and run the loop in the background.
    ///
    /// The conversation lock is acquired before the turn is spawned, so
    /// turns start in the order `send` was awaited. The receiver yields
    /// every message the loop appends (the user message itself is not
    /// echoed) and closes when the turn is done.
    pub async fn send(&self, user_text: impl Into<String>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = self.agent.clone();
        let mut conversation = self.conversation.clone().lock_owned().await;
        conversation.append(Message::user(user_text));

        tokio::spawn(async move {
            let outcome = agent
                .run(&mut conversation, |message| {
                    let _ = tx.send(message.clone());
                })
                .await;
            tracing::debug!("turn finished: {:?}", outcome);
        });

        rx
    }

    /// Run one turn inline, reporting appended messages to `observer`.
    pub async fn send_with<F>(&self, user_text: impl Into<String>, observer: F) -> LoopOutcome
    where
        F: FnMut(&Message) + Send,
    {
        let mut conversation = self.conversation.lock().await;
        conversation.append(Message::user(user_text));
        self.agent.run(&mut conversation, observer).await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }
}
