//! # Conversation Concierge
//!
//! A conversational assistant that grounds a language-model chat loop in
//! two knowledge sources: documents the user uploads, and live web search.
//!
//! ## Architecture
//!
//! ```text
//!  upload ─► extract ─► chunk ─► embed (document) ─► ┌──────────────┐
//!                                                    │ Vector Index │
//!                          document registry ◄────── └──────┬───────┘
//!                                                           │
//!  user ─► Session ─► Agent Loop ─► ChatModel               │
//!                        │   ▲                              │
//!                        ▼   │                              │
//!                      ToolSet ─► search_documents ─► embed (query)
//!                              ─► web_search
//!                              ─► weather_forecast
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! concierge init
//! concierge upload resume.pdf notes.md
//! concierge search "kubernetes experience"
//! concierge ask "what does my resume say about kubernetes?"
//! concierge chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`error`] | Library error type |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Document and chunk records |
//! | [`message`] | Conversation messages |
//! | [`extract`] | Text extraction from uploads |
//! | [`chunk`] | Overlapping text chunker |
//! | [`embedding`] | Embedding providers and vector math |
//! | [`vector_index`] | Persistent cosine index |
//! | [`registry`] | Document registry snapshot |
//! | [`ingest`] | Upload pipeline |
//! | [`retrieve`] | Query-side retrieval |
//! | [`stats`] | Collection statistics |
//! | [`llm`] | Chat model client |
//! | [`tools`] | Tool trait, built-in tools, dispatch |
//! | [`agent`] | Agent loop and sessions |
//! | [`app`] | Component wiring |

pub mod agent;
pub mod app;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod message;
pub mod models;
pub mod registry;
pub mod retrieve;
pub mod stats;
pub mod tools;
pub mod vector_index;

pub use app::Concierge;
pub use error::{ConciergeError, Result};
