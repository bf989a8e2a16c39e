//! Core data models shared by the router, store, and retrieval pipeline.
//!
//! [`Document`] is the only durable type; everything else is created per
//! turn and discarded once the response has been formatted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Arxiv,
    Manual,
    Perplexity,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::Manual => "manual",
            Source::Perplexity => "perplexity",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arxiv" => Ok(Source::Arxiv),
            "manual" => Ok(Source::Manual),
            "perplexity" => Ok(Source::Perplexity),
            other => anyhow::bail!("unknown document source: '{}'", other),
        }
    }
}

/// A unit of knowledge held by the knowledge store.
///
/// Timestamps are Unix seconds. `created_at` is fixed by the first insert;
/// later upserts of the same `id` keep it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// Build a manually added document with a content-derived id.
    pub fn manual(title: &str, body: &str, tags: BTreeSet<String>, now: i64) -> Self {
        Self {
            id: manual_id(title, body),
            source: Source::Manual,
            title: title.to_string(),
            body: body.to_string(),
            tags,
            source_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Content-derived id for manual documents: `manual-` + 16 hex chars of
/// SHA-256 over `title \n body`.
pub fn manual_id(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("manual-{}", &digest[..16])
}

/// A normalized hit from an external search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub external_id: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A paper as returned by the paper-search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Publication date, `YYYY-MM-DD`.
    #[serde(default)]
    pub published: Option<String>,
}

/// Answer from the general-Q&A collaborator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Answer {
    pub text: String,
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

/// Summary of the knowledge store contents.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct KbStats {
    pub count: i64,
    pub by_source: BTreeMap<Source, i64>,
    /// Most recent `updated_at` across all documents.
    pub last_updated: Option<i64>,
    /// Newest documents by `created_at`, at most [`RECENT_DOCUMENTS`].
    pub recent: Vec<RecentDocument>,
}

/// Number of entries reported in [`KbStats::recent`].
pub const RECENT_DOCUMENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentDocument {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}
