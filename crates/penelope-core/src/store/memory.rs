//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`: readers run concurrently,
//! writers are serialized for the few microseconds an insert takes. Nothing
//! survives the process.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Document, KbStats, RecentDocument, RECENT_DOCUMENTS};
use crate::rank::{rank_documents, ScoredDocument};

use super::Store;

pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// Aggregate stats from any iterator of documents. Shared with backends
/// that cannot compute everything in their query language.
pub fn compute_stats<'a, I>(docs: I) -> KbStats
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut stats = KbStats::default();
    let mut recent: Vec<RecentDocument> = Vec::new();
    for doc in docs {
        stats.count += 1;
        *stats.by_source.entry(doc.source).or_insert(0) += 1;
        stats.last_updated = Some(stats.last_updated.map_or(doc.updated_at, |t| t.max(doc.updated_at)));
        recent.push(RecentDocument {
            id: doc.id.clone(),
            title: doc.title.clone(),
            created_at: doc.created_at,
        });
    }
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    recent.truncate(RECENT_DOCUMENTS);
    stats.recent = recent;
    stats
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let mut stored = doc.clone();
        if let Some(existing) = docs.get(&doc.id) {
            stored.created_at = existing.created_at;
        }
        docs.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(rank_documents(docs.values().cloned(), query, limit))
    }

    async fn stats(&self) -> Result<KbStats> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(compute_stats(docs.values()))
    }

    async fn update_tags(
        &self,
        id: &str,
        tags: &BTreeSet<String>,
        updated_at: i64,
    ) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        match docs.get_mut(id) {
            Some(doc) => {
                doc.tags = tags.clone();
                doc.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        Ok(docs.remove(id).is_some())
    }
}
