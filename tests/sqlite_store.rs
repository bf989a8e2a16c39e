use std::collections::BTreeSet;
use std::sync::Arc;

use penelope::config::Config;
use penelope::sqlite_store::SqliteStore;
use penelope_core::models::{Document, Source};
use penelope_core::store::Store;
use tempfile::TempDir;

fn config(tmp: &TempDir) -> Config {
    Config::with_db_path(tmp.path().join("kb.sqlite"))
}

fn doc(id: &str, title: &str, body: &str, created_at: i64) -> Document {
    Document {
        id: id.to_string(),
        source: Source::Arxiv,
        title: title.to_string(),
        body: body.to_string(),
        tags: ["arxiv".to_string()].into_iter().collect(),
        source_url: Some(format!("https://arxiv.org/pdf/{}", id)),
        created_at,
        updated_at: created_at,
    }
}

#[tokio::test]
async fn put_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let original = doc("2106.12345", "Bitcoin Paper", "Fee markets.", 1_700_000_000);

    let store = SqliteStore::open(&config(&tmp)).await.unwrap();
    store.put(&original).await.unwrap();
    store.close().await;

    let store = SqliteStore::open(&config(&tmp)).await.unwrap();
    assert_eq!(store.get("2106.12345").await.unwrap(), Some(original));
    assert_eq!(store.stats().await.unwrap().count, 1);
    store.close().await;
}

#[tokio::test]
async fn upsert_keeps_created_at_and_single_row() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(&tmp)).await.unwrap();

    store
        .put(&doc("2106.12345", "Draft", "old body", 100))
        .await
        .unwrap();
    let mut second = doc("2106.12345", "Bitcoin Paper", "new body", 200);
    second.tags.insert("cs.cr".to_string());
    store.put(&second).await.unwrap();

    let got = store.get("2106.12345").await.unwrap().unwrap();
    assert_eq!(got.title, "Bitcoin Paper");
    assert_eq!(got.body, "new body");
    assert_eq!(got.created_at, 100);
    assert_eq!(got.updated_at, 200);
    assert!(got.tags.contains("cs.cr"));
    assert_eq!(store.stats().await.unwrap().count, 1);

    // the FTS mirror follows the new body, not the old one
    assert!(store.search("old", 5).await.unwrap().is_empty());
    assert_eq!(store.search("new", 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn search_ranks_title_match_first_and_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(&tmp)).await.unwrap();
    store
        .put(&doc("2106.12345", "Bitcoin Paper", "Fee markets.", 10))
        .await
        .unwrap();
    store
        .put(&doc("2201.00001", "Gardening", "Heat from bitcoin mining.", 20))
        .await
        .unwrap();
    store
        .put(&doc("2201.00002", "Quantum", "Surface codes.", 30))
        .await
        .unwrap();

    let first = store.search("bitcoin", 10).await.unwrap();
    let ids: Vec<&str> = first.iter().map(|h| h.document.id.as_str()).collect();
    assert_eq!(ids, vec!["2106.12345", "2201.00001"]);
    assert_eq!(first, store.search("bitcoin", 10).await.unwrap());
}

#[tokio::test]
async fn title_substring_matches_are_found() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(&tmp)).await.unwrap();
    store
        .put(&doc("1", "Cryptocurrency markets", "Volatility.", 10))
        .await
        .unwrap();

    let hits = store.search("currency", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].score, 0.5);
}

#[tokio::test]
async fn stats_and_admin_ops() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(&tmp)).await.unwrap();
    assert_eq!(store.stats().await.unwrap().count, 0);

    store.put(&doc("a", "A", "alpha", 10)).await.unwrap();
    let manual = Document::manual("Notes", "beta", BTreeSet::new(), 20);
    store.put(&manual).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.by_source.get(&Source::Arxiv), Some(&1));
    assert_eq!(stats.by_source.get(&Source::Manual), Some(&1));
    assert_eq!(stats.last_updated, Some(20));
    assert_eq!(stats.recent[0].id, manual.id);

    let tags: BTreeSet<String> = ["favorite".to_string()].into_iter().collect();
    assert!(store.update_tags("a", &tags, 30).await.unwrap());
    assert!(!store.update_tags("missing", &tags, 30).await.unwrap());
    assert_eq!(store.search("favorite", 5).await.unwrap()[0].document.id, "a");

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
    assert!(store.get("a").await.unwrap().is_none());
    assert!(store.search("alpha", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_puts_all_land() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&config(&tmp)).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .put(&doc(&format!("id-{}", i), "Paper", "bitcoin", i))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(store.stats().await.unwrap().count, 8);
}
