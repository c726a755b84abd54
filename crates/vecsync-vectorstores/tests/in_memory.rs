use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use vecsync_core::{LogicalKey, StoreOptions, SyncError};
use vecsync_embeddings::{CountingEmbeddings, FakeEmbeddings};
use vecsync_vectorstores::{Document, Embeddings, InMemoryVectorIndex, MetadataFilter, VectorIndex};

fn doc(content: &str, key: &str) -> Document {
    let mut metadata = HashMap::new();
    metadata.insert("key".to_string(), Value::String(key.to_string()));
    Document::with_metadata(content, metadata)
}

/// Fails every batch containing a text with the given marker.
struct FailingEmbeddings {
    marker: &'static str,
}

#[async_trait]
impl Embeddings for FailingEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SyncError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            return Err(SyncError::Storage("provider unavailable".to_string()));
        }
        FakeEmbeddings::default().embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SyncError> {
        FakeEmbeddings::default().embed_query(text).await
    }
}

#[tokio::test]
async fn add_documents_generates_ids() {
    let index = InMemoryVectorIndex::new();
    let embeddings = FakeEmbeddings::default();

    let ids = index
        .insert_batch(vec![doc("Document 1", "d1"), doc("Document 2", "d2")], &embeddings)
        .await
        .unwrap();

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(index.count().await.unwrap(), 2);
    let stored = index.documents().await;
    assert_eq!(stored[0].version, "1");
    assert_eq!(stored[0].id, ids[0]);
}

#[tokio::test]
async fn chunked_insert_splits_into_three_writes() {
    let index = InMemoryVectorIndex::with_options(&StoreOptions::default().with_chunk_size(500));
    let embeddings = CountingEmbeddings::new(Arc::new(FakeEmbeddings::default()));

    let docs: Vec<Document> = (0..1001)
        .map(|i| doc(&format!("document number {i}"), &format!("d{i}")))
        .collect();
    let ids = index.insert_batch(docs, &embeddings).await.unwrap();

    assert_eq!(ids.len(), 1001);
    assert_eq!(index.count().await.unwrap(), 1001);
    assert_eq!(index.write_log().await.insert_chunks, vec![500, 500, 1]);
    assert_eq!(embeddings.batch_sizes(), vec![500, 500, 1]);
}

#[tokio::test]
async fn embedding_failure_keeps_earlier_chunks() {
    let index = InMemoryVectorIndex::with_options(&StoreOptions::default().with_chunk_size(2));
    let embeddings = FailingEmbeddings { marker: "poison" };

    let docs = vec![
        doc("first", "d1"),
        doc("second", "d2"),
        doc("third", "d3"),
        doc("poison pill", "d4"),
        doc("fifth", "d5"),
    ];
    let err = index.insert_batch(docs, &embeddings).await.unwrap_err();

    match err {
        SyncError::Embedding { content, .. } => assert_eq!(content, "third"),
        other => panic!("expected embedding error, got {other:?}"),
    }
    assert_eq!(index.count().await.unwrap(), 2, "first chunk stays committed");
}

#[tokio::test]
async fn find_by_metadata_ors_filters() {
    let embeddings = FakeEmbeddings::default();
    let index = InMemoryVectorIndex::from_documents(
        vec![doc("one", "d1"), doc("two", "d2"), doc("three", "d3")],
        &embeddings,
    )
    .await
    .unwrap();

    let found = index
        .find_by_metadata(&[MetadataFilter::pair("key", "d1"), MetadataFilter::pair("key", "d3")])
        .await
        .unwrap();
    let mut contents: Vec<&str> = found.iter().map(|d| d.content.as_str()).collect();
    contents.sort();
    assert_eq!(contents, vec!["one", "three"]);

    assert!(index.find_by_metadata(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn find_by_metadata_ands_pairs_within_a_filter() {
    let embeddings = FakeEmbeddings::default();
    let mut meta = HashMap::new();
    meta.insert("key".to_string(), json!("d1"));
    meta.insert("lang".to_string(), json!("en"));
    let index = InMemoryVectorIndex::from_documents(
        vec![Document::with_metadata("hello", meta), doc("bonjour", "d2")],
        &embeddings,
    )
    .await
    .unwrap();

    let hit = MetadataFilter::new().with("key", "d1").with("lang", "en");
    let miss = MetadataFilter::new().with("key", "d2").with("lang", "en");
    assert_eq!(index.find_by_metadata(&[hit]).await.unwrap().len(), 1);
    assert!(index.find_by_metadata(&[miss]).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_filter_rejects_whole_call() {
    let embeddings = FakeEmbeddings::default();
    let index = InMemoryVectorIndex::from_documents(vec![doc("one", "d1")], &embeddings)
        .await
        .unwrap();

    let err = index
        .find_by_metadata(&[MetadataFilter::pair("key", "d1"), MetadataFilter::pair("key", "x\0")])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedFilter(_)));
}

#[tokio::test]
async fn delete_by_ids_removes_only_those() {
    let embeddings = FakeEmbeddings::default();
    let index = InMemoryVectorIndex::new();
    let ids = index
        .insert_batch(vec![doc("a", "d1"), doc("b", "d2"), doc("c", "d3")], &embeddings)
        .await
        .unwrap();

    index.delete_by_ids(&ids[1..]).await.unwrap();
    index.delete_by_ids(&[]).await.unwrap();

    let remaining = index.documents().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, ids[0]);
    assert_eq!(index.write_log().await.deletes, vec![2]);
}

#[tokio::test]
async fn search_is_ordered_and_skips_undefined_distances() {
    let embeddings = FakeEmbeddings::new(16);
    let index = InMemoryVectorIndex::from_documents(
        vec![
            doc("Rust is a systems programming language", "d1"),
            doc("Python is great for data science", "d2"),
            doc("", "empty"),
            doc("Rust has fearless concurrency", "d3"),
        ],
        &embeddings,
    )
    .await
    .unwrap();

    let query = embeddings.embed_query("Rust has fearless concurrency").await.unwrap();
    let results = index.similarity_search_by_vector(&query, 10, None).await.unwrap();

    assert_eq!(results.len(), 3, "zero-vector document has no defined distance");
    assert_eq!(results[0].0.content, "Rust has fearless concurrency");
    assert!(results[0].1.abs() < 1e-5);
    assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[tokio::test]
async fn search_respects_k_and_filter() {
    let embeddings = FakeEmbeddings::new(8);
    let docs: Vec<Document> = (0..10)
        .map(|i| doc(&format!("document number {i}"), &format!("d{i}")))
        .collect();
    let index = InMemoryVectorIndex::from_documents(docs, &embeddings).await.unwrap();
    let query = embeddings.embed_query("document").await.unwrap();

    assert_eq!(index.similarity_search_by_vector(&query, 3, None).await.unwrap().len(), 3);

    let filter = MetadataFilter::pair("key", "d7");
    let results = index
        .similarity_search_by_vector(&query, 3, Some(&filter))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.content, "document number 7");
}

#[tokio::test]
async fn missing_keys_is_a_set_difference() {
    let embeddings = FakeEmbeddings::default();
    let index = InMemoryVectorIndex::from_documents(vec![doc("a", "1"), doc("b", "3")], &embeddings)
        .await
        .unwrap();

    let keys: Vec<LogicalKey> = ["1", "2", "3", "4", "2"].into_iter().map(LogicalKey::from).collect();
    let missing = index.missing_keys("key", &keys).await.unwrap();
    assert_eq!(missing, vec![LogicalKey::from("2"), LogicalKey::from("4")]);
}

#[tokio::test]
async fn non_finite_query_matches_nothing() {
    let embeddings = FakeEmbeddings::new(4);
    let index = InMemoryVectorIndex::from_documents(vec![doc("a", "d1"), doc("b", "d2")], &embeddings)
        .await
        .unwrap();

    let query = vec![f32::NAN, 1.0, 0.0, 0.0];
    assert!(index.similarity_search_by_vector(&query, 10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn nested_array_needs_array_filter() {
    let embeddings = FakeEmbeddings::default();
    let mut meta = HashMap::new();
    meta.insert("tags".to_string(), json!(["a", "b"]));
    let index = InMemoryVectorIndex::from_documents(vec![Document::with_metadata("tagged", meta)], &embeddings)
        .await
        .unwrap();

    assert!(index.find_by_metadata(&[MetadataFilter::pair("tags", "a")]).await.unwrap().is_empty());
    assert_eq!(
        index
            .find_by_metadata(&[MetadataFilter::pair("tags", json!(["a"]))])
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn find_by_keys_compares_key_text() {
    let embeddings = FakeEmbeddings::default();
    let mut numeric = HashMap::new();
    numeric.insert("key".to_string(), json!(7));
    let index = InMemoryVectorIndex::from_documents(
        vec![Document::with_metadata("seven", numeric), doc("eight", "8"), doc("nine", "9")],
        &embeddings,
    )
    .await
    .unwrap();

    let found = index
        .find_by_keys("key", &[LogicalKey::from("7"), LogicalKey::from("8")])
        .await
        .unwrap();
    let mut contents: Vec<&str> = found.iter().map(|d| d.content.as_str()).collect();
    contents.sort();
    assert_eq!(contents, vec!["eight", "seven"]);
    assert!(index.find_by_keys("key", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn options_reach_the_index() {
    let index = InMemoryVectorIndex::with_options(
        &StoreOptions::default().with_chunk_size(7).with_version("3"),
    );
    assert_eq!(index.chunk_size(), 7);
    assert_eq!(index.version(), "3");
}
