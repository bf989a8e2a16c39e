//! SQLite-backed [`Store`] implementation.
//!
//! Documents live in `documents`; `documents_fts` mirrors title, body, and
//! tags for candidate lookup. Both are written in one transaction, so a
//! failed `put` leaves the previous version untouched. Final ordering is
//! done by [`penelope_core::rank`], which keeps results identical to the
//! in-memory backend.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use penelope_core::models::{Document, KbStats, RecentDocument, Source, RECENT_DOCUMENTS};
use penelope_core::rank::{query_terms, rank_documents, ScoredDocument};
use penelope_core::store::Store;

use crate::config::Config;
use crate::{db, migrate};

const DOCUMENT_COLUMNS: &str =
    "id, source, title, body, tags_json, source_url, created_at, updated_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date. Failure here is fatal for
    /// the process: without storage there is no knowledge base.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("failed to open database {}", config.db.path.display()))?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_candidates(&self, terms: &[String]) -> Result<Vec<Document>> {
        let fts_query = terms
            .iter()
            .map(|t| format!("\"{}\"*", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let title_clauses = terms
            .iter()
            .map(|_| "instr(lower(title), ?) > 0")
            .collect::<Vec<_>>()
            .join(" OR ");

        let sql = format!(
            "SELECT {} FROM documents \
             WHERE id IN (SELECT id FROM documents_fts WHERE documents_fts MATCH ?) OR {}",
            DOCUMENT_COLUMNS, title_clauses
        );

        let mut query = sqlx::query(&sql).bind(fts_query);
        for term in terms {
            query = query.bind(term);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let source: String = row.get("source");
    let tags_json: String = row.get("tags_json");
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("corrupt tags_json: {}", tags_json))?;
    Ok(Document {
        id: row.get("id"),
        source: source.parse()?,
        title: row.get("title"),
        body: row.get("body"),
        tags,
        source_url: row.get("source_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn tags_text(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(&self, doc: &Document) -> Result<()> {
        let tags_json = serde_json::to_string(&doc.tags)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source, title, body, tags_json, source_url,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                title = excluded.title,
                body = excluded.body,
                tags_json = excluded.tags_json,
                source_url = excluded.source_url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(doc.source.as_str())
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&tags_json)
        .bind(&doc.source_url)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents_fts WHERE id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO documents_fts (id, title, body, tags) VALUES (?, ?, ?, ?)")
            .bind(&doc.id)
            .bind(&doc.title)
            .bind(&doc.body)
            .bind(tags_text(&doc.tags))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(id = %doc.id, source = %doc.source, "document committed");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = self.fetch_candidates(&terms).await?;
        debug!(query, candidates = candidates.len(), "knowledge base candidates");
        Ok(rank_documents(candidates, query, limit))
    }

    async fn stats(&self) -> Result<KbStats> {
        let source_rows =
            sqlx::query("SELECT source, COUNT(*) AS n FROM documents GROUP BY source")
                .fetch_all(&self.pool)
                .await?;

        let mut by_source = BTreeMap::new();
        let mut count = 0i64;
        for row in &source_rows {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            by_source.insert(source.parse::<Source>()?, n);
            count += n;
        }

        let last_updated: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let recent_rows = sqlx::query(
            "SELECT id, title, created_at FROM documents ORDER BY created_at DESC, id ASC LIMIT ?",
        )
        .bind(RECENT_DOCUMENTS as i64)
        .fetch_all(&self.pool)
        .await?;

        let recent = recent_rows
            .iter()
            .map(|row| RecentDocument {
                id: row.get("id"),
                title: row.get("title"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(KbStats {
            count,
            by_source,
            last_updated,
            recent,
        })
    }

    async fn update_tags(
        &self,
        id: &str,
        tags: &BTreeSet<String>,
        updated_at: i64,
    ) -> Result<bool> {
        let tags_json = serde_json::to_string(tags)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE documents SET tags_json = ?, updated_at = ? WHERE id = ?")
            .bind(&tags_json)
            .bind(updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE documents_fts SET tags = ? WHERE id = ?")
            .bind(tags_text(tags))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents_fts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
