//! Session orchestrator: one chat line in, one [`Response`] out.
//!
//! [`Assistant::handle_turn`] parses the line, dispatches it to the store
//! or the retrieval pipeline, and formats the outcome. A turn never fails:
//! every [`TurnError`] is turned into an error response here and is
//! logged, and nothing about it survives into the next turn.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use penelope_core::command::{self, Command, CommandKind};
use penelope_core::error::TurnError;
use penelope_core::models::{Document, KbStats, SearchResult};
use penelope_core::rank::ScoredDocument;
use penelope_core::store::Store;

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::pipeline::{AssistantOptions, RetrievalPipeline, Retrieved};

/// Documents handed to the chat model as context on plain chat turns.
const CHAT_CONTEXT_DOCUMENTS: usize = 3;
const CONTEXT_BODY_CHARS: usize = 1500;
const SNIPPET_CHARS: usize = 300;

/// The formatted outcome of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub kind: CommandKind,
    pub text: String,
    pub is_error: bool,
    pub documents: Vec<Document>,
    pub results: Vec<SearchResult>,
    /// Store statistics, present on `check kb` turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<KbStats>,
}

impl Response {
    fn text(kind: CommandKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            is_error: false,
            documents: Vec::new(),
            results: Vec::new(),
            stats: None,
        }
    }

    fn error(kind: CommandKind, err: &TurnError) -> Self {
        Self {
            is_error: true,
            ..Self::text(kind, err.user_message())
        }
    }
}

pub struct Assistant {
    store: Arc<dyn Store>,
    pipeline: RetrievalPipeline,
}

impl Assistant {
    pub fn new(collaborators: Collaborators, store: Arc<dyn Store>, options: AssistantOptions) -> Self {
        Self {
            pipeline: RetrievalPipeline::new(collaborators, store.clone(), options),
            store,
        }
    }

    /// Wire the real network collaborators from configuration around `store`.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let collaborators = Collaborators::from_config(config)?;
        Ok(Self::new(
            collaborators,
            store,
            AssistantOptions::from(&config.assistant),
        ))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn pipeline(&self) -> &RetrievalPipeline {
        &self.pipeline
    }

    /// Handle one chat line. Always produces a response.
    pub async fn handle_turn(&self, line: &str) -> Response {
        let command = command::parse(line);
        info!(kind = %command.kind, "handling turn");

        match self.dispatch(&command).await {
            Ok(response) => response,
            Err(err) => {
                warn!(kind = %command.kind, code = err.code(), error = %err, "turn failed");
                Response::error(command.kind, &err)
            }
        }
    }

    async fn dispatch(&self, command: &Command) -> Result<Response, TurnError> {
        let kind = command.kind;
        let arg = command.argument.trim();
        match kind {
            CommandKind::SearchKb => {
                if arg.is_empty() {
                    return Err(TurnError::MissingArgument(kind));
                }
                let hits = self
                    .store
                    .search(arg, self.pipeline.options().kb_top_n)
                    .await
                    .map_err(|e| TurnError::StoreRead(e.to_string()))?;
                Ok(format_kb_hits(arg, hits))
            }
            CommandKind::CheckKb => {
                let stats = self
                    .store
                    .stats()
                    .await
                    .map_err(|e| TurnError::StoreRead(e.to_string()))?;
                Ok(Response {
                    stats: Some(stats.clone()),
                    ..Response::text(kind, format_stats(&stats, command.wants_details()))
                })
            }
            CommandKind::Chat => self.chat(&command.argument).await,
            CommandKind::SearchArxiv
            | CommandKind::SummarizeArxiv
            | CommandKind::AddToKb
            | CommandKind::Perplexity => {
                let retrieved = self.pipeline.retrieve(command).await?;
                Ok(format_retrieved(command, retrieved))
            }
        }
    }

    async fn chat(&self, line: &str) -> Result<Response, TurnError> {
        if line.trim().is_empty() {
            return Ok(Response::text(CommandKind::Chat, help_text()));
        }

        let context: Vec<Document> = if self.pipeline.options().chat_with_kb_context {
            match self.store.search(line, CHAT_CONTEXT_DOCUMENTS).await {
                Ok(hits) => hits.into_iter().map(|h| h.document).collect(),
                Err(e) => {
                    warn!(error = %e, "knowledge base context unavailable");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let reply = self.pipeline.complete(&chat_prompt(line, &context)).await?;
        Ok(Response {
            documents: context,
            ..Response::text(CommandKind::Chat, reply.trim())
        })
    }
}

fn chat_prompt(line: &str, context: &[Document]) -> String {
    if context.is_empty() {
        return line.to_string();
    }
    let mut prompt = String::from("Relevant entries from the knowledge base:\n");
    for (i, doc) in context.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[{}] {} ({})\n{}\n",
            i + 1,
            doc.title,
            doc.id,
            truncate_chars(&doc.body, CONTEXT_BODY_CHARS)
        ));
    }
    prompt.push_str(&format!(
        "\nUse these entries where they help and cite them by number.\n\nUser: {}",
        line
    ));
    prompt
}

fn format_kb_hits(query: &str, hits: Vec<ScoredDocument>) -> Response {
    if hits.is_empty() {
        return Response::text(
            CommandKind::SearchKb,
            format!("No documents in the knowledge base match '{}'.", query),
        );
    }
    let mut text = format!(
        "Found {} document{} for '{}':\n",
        hits.len(),
        plural(hits.len()),
        query
    );
    for (i, hit) in hits.iter().enumerate() {
        let doc = &hit.document;
        text.push_str(&format!(
            "\n{}. {} [{}] ({}, score {:.1})\n   {}\n",
            i + 1,
            doc.title,
            doc.id,
            doc.source,
            hit.score,
            truncate_chars(&doc.body, SNIPPET_CHARS)
        ));
    }
    Response {
        documents: hits.into_iter().map(|h| h.document).collect(),
        ..Response::text(CommandKind::SearchKb, text.trim_end())
    }
}

fn format_stats(stats: &KbStats, detailed: bool) -> String {
    if stats.count == 0 {
        return "The knowledge base is empty.".to_string();
    }
    let mut text = format!(
        "The knowledge base holds {} document{}.",
        stats.count,
        plural(stats.count as usize)
    );
    let by_source: Vec<String> = stats
        .by_source
        .iter()
        .map(|(source, n)| format!("{}: {}", source, n))
        .collect();
    text.push_str(&format!("\nBy source: {}", by_source.join(", ")));

    if detailed {
        if let Some(ts) = stats.last_updated {
            text.push_str(&format!("\nLast updated: {}", format_timestamp(ts)));
        }
        if !stats.recent.is_empty() {
            text.push_str("\nRecent documents:");
            for doc in &stats.recent {
                text.push_str(&format!(
                    "\n- {} [{}] added {}",
                    doc.title,
                    doc.id,
                    format_timestamp(doc.created_at)
                ));
            }
        }
    }
    text
}

fn format_retrieved(command: &Command, retrieved: Retrieved) -> Response {
    let kind = command.kind;
    match retrieved {
        Retrieved::Document(doc) => {
            let text = match kind {
                CommandKind::SummarizeArxiv => format!(
                    "Summary of '{}' ({}):\n\n{}\n\nSaved to the knowledge base as {}.",
                    doc.title, doc.id, doc.body, doc.id
                ),
                _ => format!("Added '{}' ({}) to the knowledge base.", doc.title, doc.id),
            };
            Response {
                documents: vec![doc],
                ..Response::text(kind, text)
            }
        }
        Retrieved::Results(results) => {
            let text = match kind {
                CommandKind::Perplexity => results
                    .first()
                    .map(|r| r.snippet.clone())
                    .unwrap_or_default(),
                _ if results.is_empty() => {
                    format!("No arXiv papers found for '{}'.", command.argument.trim())
                }
                _ => format_papers(command.argument.trim(), &results),
            };
            Response {
                results,
                ..Response::text(kind, text)
            }
        }
    }
}

fn format_papers(query: &str, results: &[SearchResult]) -> String {
    let mut text = format!(
        "Found {} paper{} on arXiv for '{}':\n",
        results.len(),
        plural(results.len()),
        query
    );
    for (i, r) in results.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} ({})\n   {}\n",
            i + 1,
            r.title,
            r.external_id,
            truncate_chars(&r.snippet, SNIPPET_CHARS)
        ));
        if let Some(url) = &r.url {
            text.push_str(&format!("   {}\n", url));
        }
    }
    text.push_str("\nUse 'summarize arxiv: <id>' or 'add to kb: <id>' to keep one.");
    text
}

fn help_text() -> String {
    let kinds = [
        CommandKind::SearchArxiv,
        CommandKind::SummarizeArxiv,
        CommandKind::AddToKb,
        CommandKind::SearchKb,
        CommandKind::CheckKb,
        CommandKind::Perplexity,
    ];
    let mut text = String::from("Ask me anything, or use one of these commands:");
    for kind in kinds {
        text.push_str(&format!("\n- {}", kind.usage()));
    }
    text
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{paper, FailingStore, FakeCollaborators};
    use penelope_core::error::ServiceCause;
    use penelope_core::models::Source;
    use penelope_core::store::memory::InMemoryStore;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn assistant(fakes: &FakeCollaborators, store: Arc<dyn Store>) -> Assistant {
        let options = AssistantOptions {
            timeout: Duration::from_millis(200),
            ..AssistantOptions::default()
        };
        Assistant::new(fakes.collaborators(), store, options)
    }

    fn bitcoin_doc() -> Document {
        Document {
            id: "2106.12345".to_string(),
            source: Source::Arxiv,
            title: "Bitcoin Paper".to_string(),
            body: "Fee markets in Bitcoin.".to_string(),
            tags: BTreeSet::new(),
            source_url: None,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn search_kb_puts_bitcoin_paper_first() {
        let store = Arc::new(InMemoryStore::new());
        store.put(&bitcoin_doc()).await.unwrap();
        let mut other = bitcoin_doc();
        other.id = "manual-1".to_string();
        other.title = "Gardening".to_string();
        other.body = "Tomatoes and bitcoin mining heat".to_string();
        store.put(&other).await.unwrap();

        let a = assistant(&FakeCollaborators::new(), store);
        let r = a.handle_turn("search kb: bitcoin").await;
        assert!(!r.is_error);
        assert_eq!(r.kind, CommandKind::SearchKb);
        assert_eq!(r.documents[0].id, "2106.12345");
        assert!(r.text.contains("Bitcoin Paper"));
    }

    #[tokio::test]
    async fn check_kb_on_empty_store() {
        let a = assistant(&FakeCollaborators::new(), Arc::new(InMemoryStore::new()));
        let r = a.handle_turn("check kb").await;
        assert!(!r.is_error);
        assert_eq!(r.text, "The knowledge base is empty.");

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["stats"]["count"], 0);
        assert_eq!(json["stats"]["by_source"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn stats_only_appear_on_check_kb() {
        let a = assistant(&FakeCollaborators::new(), Arc::new(InMemoryStore::new()));
        let r = a.handle_turn("search kb: bitcoin").await;
        assert!(r.stats.is_none());
        assert!(serde_json::to_value(&r).unwrap().get("stats").is_none());
    }

    #[tokio::test]
    async fn check_kb_details_lists_recent() {
        let store = Arc::new(InMemoryStore::new());
        store.put(&bitcoin_doc()).await.unwrap();
        let a = assistant(&FakeCollaborators::new(), store);

        let short = a.handle_turn("check kb").await;
        assert!(short.text.contains("1 document."));
        assert!(short.text.contains("arxiv: 1"));
        assert!(!short.text.contains("Recent documents"));

        assert_eq!(short.stats.as_ref().unwrap().count, 1);

        let full = a.handle_turn("check kb details").await;
        assert!(full.text.contains("Recent documents"));
        assert!(full.text.contains("2023-11-14 22:13 UTC"));
    }

    #[tokio::test]
    async fn summarize_stores_and_returns_document() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_results(vec![paper("2106.12345", "Bitcoin Paper")]);
        let store = Arc::new(InMemoryStore::new());
        let a = assistant(&fakes, store.clone());

        let r = a.handle_turn("summarize arxiv: 2106.12345").await;
        assert!(!r.is_error, "{}", r.text);
        assert_eq!(r.documents.len(), 1);
        assert_eq!(r.documents[0].id, "2106.12345");

        let stored = store.get("2106.12345").await.unwrap().unwrap();
        assert_eq!(stored.body, "This paper studies Bitcoin transaction fees.");
        assert!(fakes.chat.prompts()[0].contains("Abstract of Bitcoin Paper"));
    }

    #[tokio::test]
    async fn timeout_leaves_store_unchanged() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_delay(Duration::from_secs(5));
        let store = Arc::new(InMemoryStore::new());
        let a = assistant(&fakes, store.clone());

        let r = a.handle_turn("summarize arxiv: 2106.12345").await;
        assert!(r.is_error);
        assert!(r.text.contains("paper search"));
        assert_eq!(store.stats().await.unwrap().count, 0);

        // the next turn still works
        assert!(!a.handle_turn("check kb").await.is_error);
    }

    #[tokio::test]
    async fn failed_summary_writes_nothing() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_results(vec![paper("2106.12345", "Bitcoin Paper")]);
        fakes.chat.set_failure(ServiceCause::Http(529));
        let store = Arc::new(InMemoryStore::new());
        let a = assistant(&fakes, store.clone());

        let r = a.handle_turn("summarize arxiv: 2106.12345").await;
        assert!(r.is_error);
        assert!(r.text.contains("language model"));
        assert!(store.get("2106.12345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_write_failure_keeps_last_good_state() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_results(vec![
            paper("2106.12345", "Bitcoin Paper"),
            paper("2106.00002", "Taproot"),
        ]);
        let store = Arc::new(FailingStore::new());
        store.put(&bitcoin_doc()).await.unwrap();
        let a = assistant(&fakes, store.clone());

        store.set_fail_writes(true);
        let r = a.handle_turn("summarize arxiv: 2106.00002").await;
        assert!(r.is_error);
        assert_eq!(r.kind, CommandKind::SummarizeArxiv);
        assert!(r.text.contains("couldn't save"), "{}", r.text);
        assert!(r.documents.is_empty());
        assert!(store.get("2106.00002").await.unwrap().is_none());
        assert_eq!(store.get("2106.12345").await.unwrap().unwrap(), bitcoin_doc());

        let check = a.handle_turn("check kb").await;
        assert!(!check.is_error);
        assert_eq!(check.stats.unwrap().count, 1);

        store.set_fail_writes(false);
        let retry = a.handle_turn("add to kb: 2106.00002").await;
        assert!(!retry.is_error, "{}", retry.text);
        assert_eq!(store.stats().await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn dropped_turn_persists_nothing() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_results(vec![paper("2106.12345", "Bitcoin Paper")]);
        fakes.chat.set_delay(Duration::from_secs(5));
        let store = Arc::new(FailingStore::new());
        let options = AssistantOptions {
            timeout: Duration::from_secs(10),
            ..AssistantOptions::default()
        };
        let a = Assistant::new(fakes.collaborators(), store.clone(), options);

        let turn = tokio::time::timeout(
            Duration::from_millis(50),
            a.handle_turn("summarize arxiv: 2106.12345"),
        )
        .await;
        assert!(turn.is_err());
        assert_eq!(fakes.chat.calls(), 1);
        assert_eq!(store.write_attempts(), 0);
        assert!(store.get("2106.12345").await.unwrap().is_none());

        // a later turn is unaffected
        assert!(!a.handle_turn("check kb").await.is_error);
    }

    #[tokio::test]
    async fn chat_gets_kb_context() {
        let fakes = FakeCollaborators::new();
        fakes.chat.set_reply("Fees rise with demand.");
        let store = Arc::new(InMemoryStore::new());
        store.put(&bitcoin_doc()).await.unwrap();
        let a = assistant(&fakes, store);

        let r = a.handle_turn("How do bitcoin fees work?").await;
        assert_eq!(r.kind, CommandKind::Chat);
        assert_eq!(r.text, "Fees rise with demand.");
        assert_eq!(r.documents.len(), 1);
        let prompt = &fakes.chat.prompts()[0];
        assert!(prompt.contains("[1] Bitcoin Paper"));
        assert!(prompt.ends_with("User: How do bitcoin fees work?"));
    }

    #[tokio::test]
    async fn chat_without_matches_sends_line_verbatim() {
        let fakes = FakeCollaborators::new();
        let a = assistant(&fakes, Arc::new(InMemoryStore::new()));
        a.handle_turn("  hello there ").await;
        assert_eq!(fakes.chat.prompts(), vec!["  hello there ".to_string()]);
    }

    #[tokio::test]
    async fn missing_argument_gives_usage() {
        let fakes = FakeCollaborators::new();
        let a = assistant(&fakes, Arc::new(InMemoryStore::new()));
        let r = a.handle_turn("search arxiv:").await;
        assert!(r.is_error);
        assert!(r.text.contains("search arxiv: <query>"));
        assert_eq!(fakes.papers.search_calls(), 0);
    }

    #[tokio::test]
    async fn arxiv_search_lists_papers_without_storing() {
        let fakes = FakeCollaborators::new();
        fakes.papers.set_results(vec![
            paper("2106.00001", "Lightning"),
            paper("2106.00002", "Taproot"),
        ]);
        let store = Arc::new(InMemoryStore::new());
        let a = assistant(&fakes, store.clone());

        let r = a.handle_turn("Search   ArXiv : bitcoin").await;
        assert_eq!(r.kind, CommandKind::SearchArxiv);
        assert_eq!(r.results.len(), 2);
        assert!(r.text.contains("1. Lightning (2106.00001)"));
        assert_eq!(store.stats().await.unwrap().count, 0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("₿₿₿₿", 2), "₿₿...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
