//! Knowledge-base administration commands (`penelope kb ...`).
//!
//! These work on the store directly, outside any chat session. `delete`
//! is only reachable from here.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use penelope_core::models::Document;
use penelope_core::store::Store;

use crate::config::Config;
use crate::extract::{extract_text, FileKind};
use crate::sqlite_store::SqliteStore;

/// Read a txt/md/pdf/docx file and upsert it as a manual document.
///
/// The title defaults to the file stem. The file type is always added
/// as a tag alongside any `tags` given.
pub async fn add_file(
    store: &dyn Store,
    path: &Path,
    title: Option<&str>,
    tags: &[String],
) -> Result<Document> {
    let kind = FileKind::from_path(path)?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let body = extract_text(&bytes, kind).with_context(|| format!("{}", path.display()))?;

    let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| "Untitled".to_string()),
    };

    let mut tag_set: BTreeSet<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tag_set.insert(kind.tag().to_string());

    let doc = Document::manual(&title, &body, tag_set, chrono::Utc::now().timestamp());
    store.put(&doc).await?;
    info!(id = %doc.id, file = %path.display(), chars = body.len(), "file added to knowledge base");
    Ok(store.get(&doc.id).await?.unwrap_or(doc))
}

pub async fn run_add(config: &Config, path: &Path, title: Option<&str>, tags: &[String]) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let doc = add_file(&store, path, title, tags).await;
    store.close().await;
    let doc = doc?;
    println!("Added '{}' as {}", doc.title, doc.id);
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let doc = store.get(id).await;
    store.close().await;
    let Some(doc) = doc? else {
        bail!("document not found: {}", id);
    };

    println!("--- {} ---", doc.id);
    println!("title:      {}", doc.title);
    println!("source:     {}", doc.source);
    if let Some(url) = &doc.source_url {
        println!("url:        {}", url);
    }
    if !doc.tags.is_empty() {
        let tags: Vec<&str> = doc.tags.iter().map(String::as_str).collect();
        println!("tags:       {}", tags.join(", "));
    }
    println!("created:    {}", format_ts(doc.created_at));
    println!("updated:    {}", format_ts(doc.updated_at));
    println!();
    println!("{}", doc.body);
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let stats = store.stats().await;
    store.close().await;
    let stats = stats?;

    println!("Penelope — Knowledge Base");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Documents:   {}", stats.count);
    if let Some(ts) = stats.last_updated {
        println!("  Updated:     {}", format_ts(ts));
    }
    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        for (source, n) in &stats.by_source {
            println!("    {:<12} {:>6}", source.as_str(), n);
        }
    }
    if !stats.recent.is_empty() {
        println!();
        println!("  Recent:");
        for doc in &stats.recent {
            println!("    {}  {}  {}", format_ts(doc.created_at), doc.id, doc.title);
        }
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let removed = store.delete(id).await;
    store.close().await;
    if !removed? {
        bail!("document not found: {}", id);
    }
    info!(id, "document deleted");
    println!("Deleted {}", id);
    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
