//! # Penelope CLI
//!
//! ```bash
//! penelope --config ./config/penelope.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `penelope init` | Create the SQLite database and run schema migrations |
//! | `penelope ask "<line>"` | Run one chat turn and print the reply |
//! | `penelope chat` | Interactive chat on stdin |
//! | `penelope serve` | Start the HTTP server |
//! | `penelope kb add <file>` | Add a txt/md/pdf/docx file to the knowledge base |
//! | `penelope kb get <id>` | Print a stored document |
//! | `penelope kb stats` | Knowledge base statistics |
//! | `penelope kb delete <id>` | Remove a document |
//! | `penelope speak "<text>"` | Text-to-speech into an MP3 file |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `penelope=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use penelope::session::DEFAULT_SESSION;
use penelope::{chat_cmd, config, kb, migrate, server};

/// Penelope: a research chat assistant with an arXiv-backed knowledge base.
#[derive(Parser)]
#[command(name = "penelope", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/penelope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one chat line, e.g. `ask "search arxiv: taproot"`.
    Ask {
        line: String,

        /// Session the turn belongs to.
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Interactive chat on stdin.
    Chat {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Knowledge base administration.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Convert text to speech.
    Speak {
        text: String,

        /// Output MP3 file.
        #[arg(long, default_value = "penelope.mp3")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Add a .txt, .md, .pdf, or .docx file as a manual document.
    Add {
        file: PathBuf,

        /// Title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,

        /// Tag to attach; repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Print a document by id.
    Get { id: String },

    /// Show document counts and recent additions.
    Stats,

    /// Delete a document by id.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penelope=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask { line, session } => {
            chat_cmd::run_ask(&cfg, &line, &session).await?;
        }
        Commands::Chat { session } => {
            chat_cmd::run_chat(&cfg, &session).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Kb { action } => match action {
            KbAction::Add { file, title, tags } => {
                kb::run_add(&cfg, &file, title.as_deref(), &tags).await?;
            }
            KbAction::Get { id } => {
                kb::run_get(&cfg, &id).await?;
            }
            KbAction::Stats => {
                kb::run_stats(&cfg).await?;
            }
            KbAction::Delete { id } => {
                kb::run_delete(&cfg, &id).await?;
            }
        },
        Commands::Speak { text, out } => {
            chat_cmd::run_speak(&cfg, &text, &out).await?;
        }
    }

    Ok(())
}
