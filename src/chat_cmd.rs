//! Terminal entry points: `penelope ask`, `penelope chat`, `penelope speak`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use penelope_core::store::memory::InMemoryStore;

use crate::config::Config;
use crate::orchestrator::{Assistant, Response};
use crate::session::SessionManager;
use crate::sqlite_store::SqliteStore;

async fn open_sessions(config: &Config) -> Result<(Arc<SqliteStore>, SessionManager)> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let assistant = Assistant::from_config(config, store.clone())?;
    Ok((store, SessionManager::new(Arc::new(assistant))))
}

fn print_response(response: &Response) {
    if response.is_error {
        println!("[error] {}", response.text);
    } else {
        println!("{}", response.text);
    }
}

/// Run a single turn and print the reply. Fails if the turn failed.
pub async fn run_ask(config: &Config, line: &str, session: &str) -> Result<()> {
    let (store, sessions) = open_sessions(config).await?;
    let response = sessions.handle(session, line).await;
    store.close().await;

    print_response(&response);
    if response.is_error {
        bail!("turn failed ({})", response.kind);
    }
    Ok(())
}

/// Interactive loop over stdin; every line is a turn of one session.
/// Ends on EOF, `exit`, or `quit`.
pub async fn run_chat(config: &Config, session: &str) -> Result<()> {
    let (store, sessions) = open_sessions(config).await?;
    info!(session, "interactive chat started");
    println!("Penelope is listening. Type 'exit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }
        let response = sessions.handle(session, &line).await;
        print_response(&response);
        println!();
    }

    store.close().await;
    Ok(())
}

/// Synthesize `text` and write the MP3 to `out`.
pub async fn run_speak(config: &Config, text: &str, out: &Path) -> Result<()> {
    if text.trim().is_empty() {
        bail!("text must not be empty");
    }
    // speech needs no knowledge base
    let assistant = Assistant::from_config(config, Arc::new(InMemoryStore::new()))?;
    let audio = assistant
        .pipeline()
        .speak(text)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    std::fs::write(out, &audio).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} bytes of audio to {}", audio.len(), out.display());
    Ok(())
}
