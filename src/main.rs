//! # Folio CLI (`folio`)
//!
//! Index a folder of documents and chat with them.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio sync` | Index new and changed files in the watched folder |
//! | `folio stats` | Show indexed file statistics |
//! | `folio delete <filename>` | Remove a document from the index, metadata and disk |
//! | `folio query "<question>"` | Ask a single question |
//! | `folio chat` | Interactive conversation (`quit` to exit) |
//! | `folio serve` | Start the HTTP API |

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use folio::config::{self, Config};
use folio::embedding::create_embedder;
use folio::llm::create_generator;
use folio::logging;
use folio::progress::ProgressMode;
use folio::server;
use folio::sync::Library;
use folio_core::chat::ChatSession;

const DEFAULT_CONFIG: &str = "./config/folio.toml";

/// Folio: local-first document chat.
///
/// Documents placed in the watched folder are fingerprinted, chunked and
/// embedded; only new or changed files are reprocessed on each sync.
/// Questions are answered from the indexed content only.
#[derive(Parser)]
#[command(name = "folio", version, about = "Local-first document chat")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/folio.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new and changed files in the watched folder.
    Sync {
        /// Progress on stderr: off, human, or json. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show indexed file statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove a document from the index, the metadata store and the disk.
    Delete {
        /// Relative path or file name of the document.
        filename: String,
    },

    /// Ask a single question with no conversation memory.
    Query { question: String },

    /// Start an interactive chat session. Type `quit` to exit.
    Chat,

    /// Start the HTTP API server.
    Serve,
}

fn load(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(&default)
            } else {
                Ok(Config::minimal())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load(cli.config.as_ref())?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Sync { progress, json } => {
            let library = Library::open(&cfg, create_embedder(&cfg.embedding)?).await?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let summary = library.sync(mode.reporter().as_ref()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("sync {}", library.root().display());
                println!("  files processed: {}", summary.files_processed);
                for file in &summary.files {
                    println!("    {}", file);
                }
                if !summary.skipped.is_empty() {
                    println!("  skipped: {}", summary.skipped.len());
                    for s in &summary.skipped {
                        println!("    {}: {}", s.path, s.reason);
                    }
                }
                println!("ok");
            }
        }
        Commands::Stats { json } => {
            let library = Library::open(&cfg, create_embedder(&cfg.embedding)?).await?;
            let stats = library.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("files indexed: {}", stats.total_files);
                println!("index entries: {}", stats.index_size);
                match stats.last_updated {
                    Some(ts) => println!("last updated:  {}", ts.to_rfc3339()),
                    None => println!("last updated:  never"),
                }
                for file in &stats.files {
                    println!("  {}", file);
                }
            }
        }
        Commands::Delete { filename } => {
            let library = Library::open(&cfg, create_embedder(&cfg.embedding)?).await?;
            let outcome = library.delete(&filename).await?;
            println!(
                "deleted {} ({} chunks{})",
                outcome.path,
                outcome.chunks_removed,
                if outcome.file_removed { ", file removed" } else { "" }
            );
        }
        Commands::Query { question } => {
            let library = Library::open(&cfg, create_embedder(&cfg.embedding)?).await?;
            let retriever =
                library.retriever(create_generator(&cfg.generation)?, cfg.retrieval.params());
            println!("{}", retriever.query(&question).await?);
        }
        Commands::Chat => {
            let library = Library::open(&cfg, create_embedder(&cfg.embedding)?).await?;
            let retriever =
                library.retriever(create_generator(&cfg.generation)?, cfg.retrieval.params());
            run_repl(ChatSession::new(retriever)).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_repl(mut session: ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    println!("Ask about your documents. Type 'reset' to forget the conversation, 'quit' to exit.");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        match message.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "reset" => {
                session.reset();
                println!("Conversation forgotten.\n");
                continue;
            }
            _ => {}
        }
        match session.chat(message).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(())
}

