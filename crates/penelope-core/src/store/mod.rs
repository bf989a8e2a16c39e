//! Storage abstraction for the knowledge base.
//!
//! The [`Store`] trait is everything the orchestrator and retrieval
//! pipeline need from persistence. Backends:
//!
//! - [`memory::InMemoryStore`]: `RwLock<HashMap>`, for tests and embedding.
//! - `penelope::sqlite_store::SqliteStore`: durable SQLite + FTS5.
//!
//! Implementations must be `Send + Sync` and must make a successful
//! [`put`](Store::put) visible to every later [`get`](Store::get),
//! [`search`](Store::search), and [`stats`](Store::stats).

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, KbStats};
use crate::rank::ScoredDocument;

/// Abstract knowledge store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put`](Store::put) | Upsert by id, keeping the original `created_at` |
/// | [`get`](Store::get) | Fetch by id; absence is `Ok(None)` |
/// | [`search`](Store::search) | Ranked token-overlap search |
/// | [`stats`](Store::stats) | Counts by source and recent documents |
/// | [`update_tags`](Store::update_tags) | Replace the tag set of one document |
/// | [`delete`](Store::delete) | Administrative removal |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document.
    ///
    /// On update, title, body, tags, source, url, and `updated_at` are
    /// overwritten; `created_at` is preserved. Returns once the write is
    /// durable for the backend.
    async fn put(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Ranked search, see [`crate::rank`] for the ordering contract.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>>;

    async fn stats(&self) -> Result<KbStats>;

    /// Replace the tags of an existing document. Returns `false` if absent.
    async fn update_tags(&self, id: &str, tags: &BTreeSet<String>, updated_at: i64)
        -> Result<bool>;

    /// Remove a document. Returns `false` if absent.
    async fn delete(&self, id: &str) -> Result<bool>;
}
