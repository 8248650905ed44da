//! # Concierge CLI (`concierge`)
//!
//! Thin front end over [`concierge::Concierge`].
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `concierge init` | Create the storage directory and a starter config |
//! | `concierge upload <files…>` | Extract, chunk, embed, and index files |
//! | `concierge docs` | List uploaded documents |
//! | `concierge stats` | Document, chunk, and vector counts |
//! | `concierge search "<query>"` | Retrieve the most similar chunks |
//! | `concierge ask "<prompt>"` | One conversational turn |
//! | `concierge chat` | Interactive conversation on stdin |

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;

use concierge::config::{self, Config};
use concierge::message::{Message, ToolPayload};
use concierge::stats::render_stats;
use concierge::tools::NO_DOCUMENTS_MESSAGE;
use concierge::Concierge;

/// Conversational assistant grounded in your documents and the web.
///
/// All commands accept `--config` pointing to a TOML file; a missing file
/// means built-in defaults.
#[derive(Parser)]
#[command(name = "concierge", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/concierge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directory, and a starter config if none exists.
    Init,

    /// Upload one or more files.
    ///
    /// Each file is extracted to text, split into overlapping chunks,
    /// embedded, and added to the vector index and document registry.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List uploaded documents.
    Docs,

    /// Show document, chunk, and vector counts.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the chunks most similar to a query.
    Search {
        query: String,

        /// Number of chunks to return (default: `[retrieval] top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a single question and print the conversation turn.
    Ask { prompt: String },

    /// Chat interactively. Type `exit` or `quit` to leave.
    Chat,
}

const STARTER_CONFIG: &str = r#"[paths]
processed_dir = "processed_docs"

[chunking]
chunk_size = 1000
chunk_overlap = 200

[embedding]
provider = "gemini"   # "lexical" works offline without GOOGLE_API_KEY
model = "text-embedding-004"
dims = 768

[chat]
model = "gemini-2.5-flash"
temperature = 0.8
max_tool_rounds = 8

[retrieval]
top_k = 3

[logging]
level = "info"
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    concierge::logging::init(&cfg.logging);

    let command = match cli.command {
        Commands::Init => return run_init(&cli.config, &cfg),
        command => command,
    };
    let app = Concierge::open(cfg)?;

    match command {
        Commands::Init => {}
        Commands::Upload { files } => {
            let mut failed = 0;
            for path in &files {
                match app.ingest_path(path).await {
                    Ok(doc) => println!(
                        "Uploaded {} as {} ({} chunks)",
                        doc.filename, doc.id, doc.chunk_count
                    ),
                    Err(e) => {
                        eprintln!("Failed to upload {}: {}", path.display(), e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} uploads failed", failed, files.len());
            }
        }
        Commands::Docs => {
            let docs = app.documents().await;
            if docs.is_empty() {
                println!("No documents uploaded.");
            } else {
                println!("{:<36}  {:>6}  {:<25}  FILENAME", "ID", "CHUNKS", "UPLOADED");
                for doc in docs {
                    println!(
                        "{:<36}  {:>6}  {:<25}  {}",
                        doc.id, doc.chunk_count, doc.upload_time, doc.filename
                    );
                }
            }
        }
        Commands::Stats { json } => {
            let stats = app.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", render_stats(&stats, &app.config().paths.processed_dir));
            }
        }
        Commands::Search { query, top_k } => {
            let chunks = app.retrieve(&query, top_k).await?;
            if chunks.is_empty() {
                println!("{}", NO_DOCUMENTS_MESSAGE);
            }
            for chunk in chunks {
                println!(
                    "{}. [{:.3}] {} ({})",
                    chunk.rank + 1,
                    chunk.score,
                    chunk.filename,
                    chunk.chunk_id
                );
                println!("   {}", preview(&chunk.content, 240));
            }
        }
        Commands::Ask { prompt } => {
            let session = app.session()?;
            session.send_with(prompt, print_message).await;
        }
        Commands::Chat => {
            let session = app.session()?;
            let stdin = std::io::stdin();
            loop {
                print!("> ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                let mut rx = session.send(line).await;
                while let Some(message) = rx.recv().await {
                    print_message(&message);
                }
            }
        }
    }

    Ok(())
}

fn run_init(config_path: &std::path::Path, cfg: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cfg.paths.processed_dir).with_context(|| {
        format!(
            "failed to create storage directory {}",
            cfg.paths.processed_dir.display()
        )
    })?;
    println!("Storage directory: {}", cfg.paths.processed_dir.display());

    if config_path.exists() {
        println!("Using existing config: {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, STARTER_CONFIG)?;
        println!("Wrote starter config: {}", config_path.display());
    }
    Ok(())
}

fn print_message(message: &Message) {
    match message {
        Message::Assistant {
            content,
            tool_calls,
        } => {
            for call in tool_calls {
                println!(
                    "  → {}({})",
                    call.name,
                    serde_json::Value::Object(call.args.clone())
                );
            }
            if !content.is_empty() {
                println!("{}", content);
            }
        }
        Message::Tool { name, payload, .. } => {
            let status = match payload {
                ToolPayload::Success(_) => "ok",
                ToolPayload::Error(_) => "error",
            };
            println!("  ← {} [{}] {}", name, status, preview(&message.text(), 160));
        }
        Message::User { content } | Message::System { content } => println!("{}", content),
    }
}

/// First `max` characters on one line.
fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}
