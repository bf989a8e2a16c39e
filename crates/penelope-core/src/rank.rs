//! Token-overlap ranking shared by every [`Store`](crate::store::Store) backend.
//!
//! # Scoring
//!
//! Each distinct lowercased query token contributes:
//!
//! | Match | Weight |
//! |-------|--------|
//! | whole token in the title | 3.0 |
//! | equal to a tag | 2.0 |
//! | whole token in the body | 1.0 |
//! | substring (not a whole token) of the title | 0.5 |
//!
//! Documents scoring zero are dropped. Results are sorted by score
//! (desc), `created_at` (desc), then `id` (asc), so ordering is total and
//! repeated searches over unchanged contents return identical results.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::Document;

const TITLE_WEIGHT: f64 = 3.0;
const TAG_WEIGHT: f64 = 2.0;
const BODY_WEIGHT: f64 = 1.0;
const TITLE_SUBSTRING_WEIGHT: f64 = 0.5;

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct query tokens in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Score one document against pre-tokenized query terms.
pub fn score_document(doc: &Document, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let title_lower = doc.title.to_lowercase();
    let title_tokens: HashSet<String> = tokenize(&doc.title).into_iter().collect();
    let body_tokens: HashSet<String> = tokenize(&doc.body).into_iter().collect();
    let tags: HashSet<String> = doc.tags.iter().map(|t| t.to_lowercase()).collect();

    terms
        .iter()
        .map(|term| {
            let mut s = 0.0;
            if title_tokens.contains(term) {
                s += TITLE_WEIGHT;
            } else if title_lower.contains(term.as_str()) {
                s += TITLE_SUBSTRING_WEIGHT;
            }
            if tags.contains(term) {
                s += TAG_WEIGHT;
            }
            if body_tokens.contains(term) {
                s += BODY_WEIGHT;
            }
            s
        })
        .sum()
}

/// A document paired with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// Score, filter, sort, and truncate a candidate set.
pub fn rank_documents<I>(candidates: I, query: &str, limit: usize) -> Vec<ScoredDocument>
where
    I: IntoIterator<Item = Document>,
{
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredDocument> = candidates
        .into_iter()
        .filter_map(|document| {
            let score = score_document(&document, &terms);
            (score > 0.0).then_some(ScoredDocument { document, score })
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored.truncate(limit);
    scored
}

fn compare_ranked(a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.document.created_at.cmp(&a.document.created_at))
        .then_with(|| a.document.id.cmp(&b.document.id))
}
