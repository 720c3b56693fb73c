//! # rag-agent CLI (`ragent`)
//!
//! ## Usage
//!
//! ```bash
//! ragent --config ./config/ragent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragent index` | Index the documents directory if the collection is empty |
//! | `ragent reindex` | Clear the collection and index the documents directory again |
//! | `ragent stats` | Show index size, sessions and settings |
//! | `ragent ask "<query>"` | Answer one question in a fresh session |
//! | `ragent chat` | Interactive question answering in one session |
//! | `ragent serve` | Start the HTTP API |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use rag_agent::agent::QueryOptions;
use rag_agent::config::{self, Config};
use rag_agent::ingest::IngestReport;
use rag_agent::service::RagService;
use rag_agent::{logging, server};

const DEFAULT_CONFIG: &str = "./config/ragent.toml";

/// Answer questions about a directory of PDFs with retrieval-augmented
/// generation.
#[derive(Parser)]
#[command(
    name = "ragent",
    about = "Retrieval-augmented question answering over PDF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ragent.toml`; built-in defaults apply when that
    /// file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the documents directory unless the collection already has data.
    Index,

    /// Clear the collection and index the documents directory again.
    Reindex,

    /// Show index size, active sessions and model settings.
    Stats,

    /// Answer a single question in a fresh session.
    Ask {
        /// The question.
        query: String,

        /// Send the question to the model without retrieved context.
        #[arg(long)]
        no_rag: bool,

        /// Number of chunks to retrieve (overrides `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Only retrieve from this source file (e.g. `handbook.pdf`).
        #[arg(long)]
        source: Option<String>,
    },

    /// Interactive chat in one session.
    ///
    /// Type `/clear` to forget the conversation, `/history` to print it and
    /// `/quit` to leave.
    Chat,

    /// Start the HTTP API.
    ///
    /// Indexes the documents directory first when the collection is empty.
    Serve,
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(default)
            } else {
                tracing::debug!("no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

fn print_report(report: &IngestReport) {
    println!("  PDF files found: {}", report.files_found);
    println!("  files indexed: {}", report.files_indexed);
    if report.files_failed > 0 {
        println!("  files skipped: {}", report.files_failed);
    }
    println!("  chunks indexed: {}", report.chunks_indexed);
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = load(cli.config.as_deref())?;
    let service = Arc::new(RagService::from_config(cfg).await?);

    match cli.command {
        Commands::Index => match service.initialize_index().await? {
            Some(report) => {
                println!("index {}", service.config().documents.dir.display());
                print_report(&report);
                println!("ok");
            }
            None => {
                let stats = service.stats().await?;
                println!(
                    "index unchanged: {} chunks in '{}'",
                    stats.indexed_chunks, stats.collection
                );
            }
        },
        Commands::Reindex => {
            let report = service.reindex().await?;
            println!("reindex {}", service.config().documents.dir.display());
            print_report(&report);
            println!("ok");
        }
        Commands::Stats => {
            let stats = service.stats().await?;
            println!("collection: {}", stats.collection);
            println!("  indexed chunks: {}", stats.indexed_chunks);
            println!("  active sessions: {}", stats.active_sessions);
            println!("  model: {}", stats.model);
            println!("  temperature: {}", stats.temperature);
            println!("  chunk size: {}", stats.chunk_size);
            println!("  top_k: {}", stats.top_k);
        }
        Commands::Ask {
            query,
            no_rag,
            top_k,
            source,
        } => {
            let agent = service.agent();
            let session_id = agent.create_session();
            let options = QueryOptions {
                use_rag: !no_rag,
                top_k,
                source_filter: source,
            };
            let answer = agent.process_query(&session_id, &query, &options).await?;
            println!("{}", answer.response);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources: {}", answer.sources.join(", "));
            }
            agent.end_session(&session_id);
        }
        Commands::Chat => run_chat(&service).await?,
        Commands::Serve => {
            service.initialize_index().await?;
            let every = service.config().session.sweep_interval_secs;
            if every > 0 {
                service.spawn_session_sweeper(Duration::from_secs(every));
            }
            server::run_server(service).await?;
        }
    }

    Ok(())
}

async fn run_chat(service: &RagService) -> Result<()> {
    let agent = service.agent();
    let session_id = agent.create_session();
    let options = QueryOptions::default();

    println!("Ask a question about your documents. /clear, /history, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => match agent.clear_session_history(&session_id) {
                Ok(()) => println!("history cleared"),
                Err(e) => eprintln!("error: {}", e),
            },
            "/history" => {
                for msg in agent.session_history(&session_id) {
                    println!("[{}] {}: {}", msg.timestamp.format("%H:%M:%S"), msg.role.as_str(), msg.content);
                }
            }
            query => match agent.process_query(&session_id, query, &options).await {
                Ok(answer) => {
                    println!("{}", answer.response);
                    if !answer.sources.is_empty() {
                        println!("(sources: {})", answer.sources.join(", "));
                    }
                }
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }

    agent.end_session(&session_id);
    Ok(())
}
