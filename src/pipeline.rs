//! Retrieval pipeline: runs the external half of a turn.
//!
//! Commands that need a collaborator come through [`RetrievalPipeline::retrieve`].
//! Every collaborator call is bounded by the configured timeout; any
//! failure becomes [`TurnError::ExternalService`] and nothing is written.
//! The only store write here happens after the collaborator response is
//! complete, so a cancelled or failed turn never leaves a partial document.
//!
//! | Command | Collaborator | Persists |
//! |---------|--------------|----------|
//! | `search arxiv:` | paper search | no (papers are cached) |
//! | `summarize arxiv:` | paper search + chat model | summary document |
//! | `add to kb:` | paper search | abstract document |
//! | `perplexity:` | answer engine | no |

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use penelope_core::command::{Command, CommandKind};
use penelope_core::error::{Collaborator, ServiceCause, TurnError};
use penelope_core::models::{Document, Paper, SearchResult, Source};
use penelope_core::store::Store;

use crate::collaborators::arxiv::normalize_id;
use crate::collaborators::Collaborators;
use crate::config::AssistantConfig;

/// Papers remembered from recent searches.
const PAPER_CACHE_CAPACITY: usize = 128;

/// Options the pipeline and orchestrator act on.
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub timeout: Duration,
    pub max_search_results: usize,
    pub kb_top_n: usize,
    pub chat_with_kb_context: bool,
}

impl From<&AssistantConfig> for AssistantOptions {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_search_results: config.max_search_results,
            kb_top_n: config.kb_top_n,
            chat_with_kb_context: config.chat_with_kb_context,
        }
    }
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

/// What a pipeline command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    Results(Vec<SearchResult>),
    /// A document that has been written to the store.
    Document(Document),
}

/// Bounded, insertion-ordered cache of papers keyed by normalized id.
///
/// The oldest entry is evicted once capacity is reached. Re-inserting an
/// id refreshes its metadata but not its position.
pub struct PaperCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    order: VecDeque<String>,
    papers: HashMap<String, Paper>,
}

impl PaperCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn insert(&self, paper: Paper) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let id = paper.id.clone();
        if inner.papers.insert(id.clone(), paper).is_none() {
            inner.order.push_back(id);
            while inner.order.len() > self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.papers.remove(&oldest);
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Paper> {
        self.inner.lock().ok()?.papers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.papers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RetrievalPipeline {
    collaborators: Collaborators,
    store: Arc<dyn Store>,
    options: AssistantOptions,
    cache: PaperCache,
}

impl RetrievalPipeline {
    pub fn new(collaborators: Collaborators, store: Arc<dyn Store>, options: AssistantOptions) -> Self {
        Self {
            collaborators,
            store,
            options,
            cache: PaperCache::new(PAPER_CACHE_CAPACITY),
        }
    }

    pub fn options(&self) -> &AssistantOptions {
        &self.options
    }

    pub fn cache(&self) -> &PaperCache {
        &self.cache
    }

    /// Run the external part of `command`.
    ///
    /// Kinds without an external half (`search kb`, `check kb`, chat) are
    /// answered with empty results; the orchestrator handles them itself.
    pub async fn retrieve(&self, command: &Command) -> Result<Retrieved, TurnError> {
        let arg = command.argument.trim();
        if arg.is_empty() && needs_argument(command.kind) {
            return Err(TurnError::MissingArgument(command.kind));
        }
        match command.kind {
            CommandKind::SearchArxiv => self.search_arxiv(arg).await.map(Retrieved::Results),
            CommandKind::SummarizeArxiv => self.summarize_arxiv(arg).await.map(Retrieved::Document),
            CommandKind::AddToKb => self.add_to_kb(arg).await.map(Retrieved::Document),
            CommandKind::Perplexity => self.perplexity(arg).await.map(Retrieved::Results),
            CommandKind::SearchKb | CommandKind::CheckKb | CommandKind::Chat => {
                Ok(Retrieved::Results(Vec::new()))
            }
        }
    }

    /// Ask the chat model, bounded by the turn timeout.
    pub async fn complete(&self, prompt: &str) -> Result<String, TurnError> {
        self.call(Collaborator::ChatModel, self.collaborators.chat.complete(prompt))
            .await
    }

    /// Synthesize speech, bounded by the turn timeout. Chat turns never call this.
    pub async fn speak(&self, text: &str) -> Result<Vec<u8>, TurnError> {
        self.call(Collaborator::Speech, self.collaborators.speech.speak(text))
            .await
    }

    async fn search_arxiv(&self, query: &str) -> Result<Vec<SearchResult>, TurnError> {
        let papers = self
            .call(
                Collaborator::PaperSearch,
                self.collaborators
                    .papers
                    .search(query, self.options.max_search_results),
            )
            .await?;

        let n = papers.len();
        info!(query, count = n, "arXiv search complete");
        let results = papers
            .iter()
            .enumerate()
            .map(|(i, p)| SearchResult {
                title: p.title.clone(),
                snippet: p.abstract_text.clone(),
                external_id: p.id.clone(),
                score: 1.0 - i as f64 / n as f64,
                url: p.url.clone(),
            })
            .collect();
        for paper in papers {
            self.cache.insert(paper);
        }
        Ok(results)
    }

    async fn summarize_arxiv(&self, paper_id: &str) -> Result<Document, TurnError> {
        let paper = self.lookup_paper(paper_id).await?;
        let summary = self.complete(&summary_prompt(&paper)).await?;
        self.persist(paper_document(&paper, summary.trim().to_string()))
            .await
    }

    async fn add_to_kb(&self, paper_id: &str) -> Result<Document, TurnError> {
        let paper = self.lookup_paper(paper_id).await?;
        self.persist(paper_document(&paper, paper.abstract_text.clone()))
            .await
    }

    async fn perplexity(&self, query: &str) -> Result<Vec<SearchResult>, TurnError> {
        let answer = self
            .call(Collaborator::AnswerEngine, self.collaborators.answers.ask(query))
            .await?;

        let mut snippet = answer.text.trim().to_string();
        if !answer.references.is_empty() {
            snippet.push_str("\n\nReferences:");
            for (i, r) in answer.references.iter().enumerate() {
                snippet.push_str(&format!("\n{}. {}: {}", i + 1, r.title, r.url));
            }
        }
        Ok(vec![SearchResult {
            title: query.to_string(),
            snippet,
            external_id: "perplexity".to_string(),
            score: 1.0,
            url: answer.references.first().map(|r| r.url.clone()),
        }])
    }

    /// Cache first, then the paper-search collaborator.
    async fn lookup_paper(&self, paper_id: &str) -> Result<Paper, TurnError> {
        let id = normalize_id(paper_id);
        if let Some(paper) = self.cache.get(&id) {
            debug!(id = %id, "paper cache hit");
            return Ok(paper);
        }
        let paper = self
            .call(Collaborator::PaperSearch, self.collaborators.papers.fetch(&id))
            .await?
            .ok_or_else(|| TurnError::NotFound(id.clone()))?;
        self.cache.insert(paper.clone());
        Ok(paper)
    }

    /// Upsert `doc` and return the stored version, whose `created_at` is
    /// the original one when the id already existed.
    async fn persist(&self, doc: Document) -> Result<Document, TurnError> {
        self.store.put(&doc).await.map_err(|e| {
            warn!(id = %doc.id, error = %e, "store write failed");
            TurnError::StoreWrite(e.to_string())
        })?;
        info!(id = %doc.id, source = %doc.source, "document stored");
        match self.store.get(&doc.id).await {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Ok(doc),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "re-reading stored document failed");
                Ok(doc)
            }
        }
    }

    async fn call<T, F>(&self, collaborator: Collaborator, fut: F) -> Result<T, TurnError>
    where
        F: Future<Output = Result<T, ServiceCause>>,
    {
        match tokio::time::timeout(self.options.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => {
                warn!(%collaborator, %cause, "collaborator call failed");
                Err(TurnError::external(collaborator, cause))
            }
            Err(_) => {
                warn!(%collaborator, "collaborator call timed out");
                Err(TurnError::external(
                    collaborator,
                    ServiceCause::Timeout(self.options.timeout.as_secs()),
                ))
            }
        }
    }
}

fn needs_argument(kind: CommandKind) -> bool {
    matches!(
        kind,
        CommandKind::SearchArxiv
            | CommandKind::SummarizeArxiv
            | CommandKind::AddToKb
            | CommandKind::Perplexity
            | CommandKind::SearchKb
    )
}

fn summary_prompt(paper: &Paper) -> String {
    format!(
        "Please provide a concise summary of the following research paper.\n\n\
         Title: {}\nAuthors: {}\nAbstract: {}\nURL: {}\n\n\
         Focus on the main contributions, the methods used, and the key findings.",
        paper.title,
        paper.authors.join(", "),
        paper.abstract_text,
        paper.url.as_deref().unwrap_or("n/a"),
    )
}

fn paper_document(paper: &Paper, body: String) -> Document {
    let now = chrono::Utc::now().timestamp();
    let mut tags: BTreeSet<String> = paper.categories.iter().map(|c| c.to_lowercase()).collect();
    tags.insert("arxiv".to_string());
    Document {
        id: paper.id.clone(),
        source: Source::Arxiv,
        title: paper.title.clone(),
        body,
        tags,
        source_url: paper.url.clone(),
        created_at: now,
        updated_at: now,
    }
}
