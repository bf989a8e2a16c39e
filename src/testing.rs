//! Hand-written collaborators that never touch the network.
//!
//! Used by the unit and integration tests to drive the pipeline,
//! orchestrator, and HTTP server deterministically. Each fake records how
//! often it was called and can be told to fail or to stall.
//!
//! Compiled for this crate's own tests and behind the `testing` feature.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use penelope_core::error::ServiceCause;
use penelope_core::models::{Answer, Document, KbStats, Paper, Reference};
use penelope_core::rank::ScoredDocument;
use penelope_core::store::memory::InMemoryStore;
use penelope_core::store::Store;

use crate::collaborators::{AnswerEngine, ChatModel, Collaborators, PaperSearch, SpeechSynth};

/// A paper with predictable metadata derived from `id` and `title`.
pub fn paper(id: &str, title: &str) -> Paper {
    Paper {
        id: id.to_string(),
        title: title.to_string(),
        abstract_text: format!("Abstract of {}", title),
        authors: vec!["Satoshi Nakamoto".to_string()],
        url: Some(format!("https://arxiv.org/pdf/{}", id)),
        categories: vec!["cs.CR".to_string()],
        published: Some("2021-06-23".to_string()),
    }
}

#[derive(Default)]
struct Behavior {
    delay: Option<Duration>,
    failure: Option<ServiceCause>,
}

impl Behavior {
    async fn apply(&self) -> Result<(), ServiceCause> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(cause) => Err(cause.clone()),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> Behavior {
        Behavior {
            delay: self.delay,
            failure: self.failure.clone(),
        }
    }
}

#[derive(Default)]
pub struct FakePaperSearch {
    papers: Mutex<Vec<Paper>>,
    behavior: Mutex<Behavior>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakePaperSearch {
    /// Papers returned by `search` and looked up by `fetch`.
    pub fn set_results(&self, papers: Vec<Paper>) {
        if let Ok(mut p) = self.papers.lock() {
            *p = papers;
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut b) = self.behavior.lock() {
            b.delay = Some(delay);
        }
    }

    pub fn set_failure(&self, cause: ServiceCause) {
        if let Ok(mut b) = self.behavior.lock() {
            b.failure = Some(cause);
        }
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> Behavior {
        self.behavior
            .lock()
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }

    fn papers(&self) -> Vec<Paper> {
        self.papers.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaperSearch for FakePaperSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Paper>, ServiceCause> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.behavior().apply().await?;
        let mut papers = self.papers();
        papers.truncate(max_results);
        Ok(papers)
    }

    async fn fetch(&self, id: &str) -> Result<Option<Paper>, ServiceCause> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.behavior().apply().await?;
        Ok(self.papers().into_iter().find(|p| p.id == id))
    }
}

pub struct FakeChat {
    reply: Mutex<String>,
    prompts: Mutex<Vec<String>>,
    behavior: Mutex<Behavior>,
}

impl Default for FakeChat {
    fn default() -> Self {
        Self {
            reply: Mutex::new("This paper studies Bitcoin transaction fees.".to_string()),
            prompts: Mutex::new(Vec::new()),
            behavior: Mutex::new(Behavior::default()),
        }
    }
}

impl FakeChat {
    pub fn set_reply(&self, reply: &str) {
        if let Ok(mut r) = self.reply.lock() {
            *r = reply.to_string();
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut b) = self.behavior.lock() {
            b.delay = Some(delay);
        }
    }

    pub fn set_failure(&self, cause: ServiceCause) {
        if let Ok(mut b) = self.behavior.lock() {
            b.failure = Some(cause);
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Every prompt received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceCause> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        let behavior = self
            .behavior
            .lock()
            .map(|b| b.snapshot())
            .unwrap_or_default();
        behavior.apply().await?;
        Ok(self.reply.lock().map(|r| r.clone()).unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeAnswers {
    calls: AtomicUsize,
}

impl FakeAnswers {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerEngine for FakeAnswers {
    async fn ask(&self, _query: &str) -> Result<Answer, ServiceCause> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Answer {
            text: "A UTXO is an unspent transaction output.".to_string(),
            references: vec![Reference {
                title: "UTXO".to_string(),
                url: "https://example.com/utxo".to_string(),
            }],
        })
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    calls: AtomicUsize,
}

impl FakeSpeech {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynth for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<Vec<u8>, ServiceCause> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut audio = b"ID3".to_vec();
        audio.extend_from_slice(text.as_bytes());
        Ok(audio)
    }
}

/// One of each fake, shared so tests can inspect them after a turn.
#[derive(Clone, Default)]
pub struct FakeCollaborators {
    pub papers: Arc<FakePaperSearch>,
    pub chat: Arc<FakeChat>,
    pub answers: Arc<FakeAnswers>,
    pub speech: Arc<FakeSpeech>,
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            papers: self.papers.clone(),
            chat: self.chat.clone(),
            answers: self.answers.clone(),
            speech: self.speech.clone(),
        }
    }
}

/// An in-memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> anyhow::Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn put(&self, doc: &Document) -> anyhow::Result<()> {
        self.check_write()?;
        self.inner.put(doc).await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Document>> {
        self.inner.get(id).await
    }

    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ScoredDocument>> {
        self.inner.search(query, limit).await
    }

    async fn stats(&self) -> anyhow::Result<KbStats> {
        self.inner.stats().await
    }

    async fn update_tags(
        &self,
        id: &str,
        tags: &BTreeSet<String>,
        updated_at: i64,
    ) -> anyhow::Result<bool> {
        self.check_write()?;
        self.inner.update_tags(id, tags, updated_at).await
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.check_write()?;
        self.inner.delete(id).await
    }
}
