use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use vecsync_embeddings::{CountingEmbeddings, FakeEmbeddings};
use vecsync_sync::{
    ChangeOutcome, ChangeTracker, ContentField, DocumentSynthesizer, Entity, IgnoreReason,
    InMemoryEntitySource, MetadataField, StoreOptions, VectorStore, VectorStoreRegistry,
};
use vecsync_vectorstores::InMemoryVectorIndex;

fn entity(value: Value) -> Entity {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn columns(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

struct Fixture {
    index: Arc<InMemoryVectorIndex>,
    embeddings: Arc<CountingEmbeddings>,
    source: Arc<InMemoryEntitySource>,
    tracker: Arc<ChangeTracker>,
}

async fn fixture(synthesizer: DocumentSynthesizer) -> Fixture {
    let options = StoreOptions::new("test_entity_vectors");
    let index = Arc::new(InMemoryVectorIndex::with_options(&options));
    let embeddings = Arc::new(CountingEmbeddings::new(Arc::new(FakeEmbeddings::default())));
    let source = Arc::new(InMemoryEntitySource::new("id"));
    let store = VectorStore::builder(options)
        .embeddings(embeddings.clone())
        .index(index.clone())
        .build()
        .unwrap();

    let registry = VectorStoreRegistry::new();
    let tracker = registry
        .register_tracked(store, source.clone(), synthesizer)
        .await
        .unwrap();
    Fixture {
        index,
        embeddings,
        source,
        tracker,
    }
}

fn test_entity_synthesizer() -> DocumentSynthesizer {
    DocumentSynthesizer::new(
        vec![ContentField::new("text"), ContentField::new("json")],
        vec![MetadataField::new("optional")],
    )
}

#[tokio::test]
async fn entity_lifecycle() {
    let f = fixture(test_entity_synthesizer()).await;

    let key = f
        .source
        .upsert(entity(json!({
            "id": 1,
            "text": "test text",
            "json": {"k": "v"},
            "optional": "o1",
            "notEmbedding": "x"
        })))
        .await
        .unwrap();
    let outcome = f.tracker.on_entity_changed(&json!(1), None).await.unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.inserted == 1));

    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, r#"test text {"k":"v"}"#);
    assert_eq!(stored[0].metadata.get("id"), Some(&json!(1)));
    assert_eq!(stored[0].metadata.get("optional"), Some(&json!("o1")));

    // Tracked column changes: replaced in place.
    let changed = f
        .source
        .update(&key, entity(json!({"text": "updated"})))
        .await
        .unwrap();
    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&changed))
        .await
        .unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.replaced == 1));

    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, r#"updated {"k":"v"}"#);
    let updated_id = stored[0].id;

    // Untracked column changes: nothing is read, embedded or written.
    let writes = f.index.write_log().await.total();
    f.embeddings.reset();
    let changed = f
        .source
        .update(&key, entity(json!({"notEmbedding": "y"})))
        .await
        .unwrap();
    assert_eq!(changed, columns(&["notEmbedding"]));
    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&changed))
        .await
        .unwrap();

    assert_eq!(outcome, ChangeOutcome::Ignored(IgnoreReason::UntrackedColumns));
    assert_eq!(f.index.write_log().await.total(), writes);
    assert_eq!(f.embeddings.documents_embedded(), 0);
    assert_eq!(f.index.documents().await[0].id, updated_id);
}

#[tokio::test]
async fn metadata_column_change_reconciles() {
    let f = fixture(test_entity_synthesizer()).await;
    let key = f
        .source
        .upsert(entity(json!({"id": 1, "text": "t", "optional": "o1"})))
        .await
        .unwrap();
    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();

    let changed = f
        .source
        .update(&key, entity(json!({"optional": "o2"})))
        .await
        .unwrap();
    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&changed))
        .await
        .unwrap();

    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.replaced == 1));
    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].metadata.get("optional"), Some(&json!("o2")));
}

#[tokio::test]
async fn metadata_column_cleared_to_null_reconciles() {
    let f = fixture(test_entity_synthesizer()).await;
    let key = f
        .source
        .upsert(entity(json!({"id": 1, "text": "t", "optional": "o1"})))
        .await
        .unwrap();
    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();

    let changed = f
        .source
        .update(&key, entity(json!({"optional": null})))
        .await
        .unwrap();
    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&changed))
        .await
        .unwrap();

    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.replaced == 1));
    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].metadata.get("optional"), Some(&Value::Null));

    // The cleared value now matches, so a repeat is a no-op.
    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&columns(&["optional"])))
        .await
        .unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.is_noop()));
}

#[tokio::test]
async fn redundant_notification_is_skipped() {
    let f = fixture(test_entity_synthesizer()).await;
    f.source
        .upsert(entity(json!({"id": 1, "text": "t"})))
        .await
        .unwrap();
    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();
    let writes = f.index.write_log().await.total();

    let outcome = f
        .tracker
        .on_entity_changed(&json!(1), Some(&columns(&["text"])))
        .await
        .unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.skipped == 1 && o.is_noop()));
    assert_eq!(f.index.write_log().await.total(), writes);
}

#[tokio::test]
async fn insert_without_content_is_ignored() {
    let f = fixture(test_entity_synthesizer()).await;
    f.source
        .upsert(entity(json!({"id": 1, "optional": "o1"})))
        .await
        .unwrap();

    let outcome = f.tracker.on_entity_changed(&json!(1), None).await.unwrap();
    assert_eq!(outcome, ChangeOutcome::Ignored(IgnoreReason::NoContent));
    assert_eq!(f.index.write_log().await.total(), 0);
}

#[tokio::test]
async fn vanished_entity_is_ignored() {
    let f = fixture(test_entity_synthesizer()).await;
    let outcome = f
        .tracker
        .on_entity_changed(&json!(42), Some(&columns(&["text"])))
        .await
        .unwrap();
    assert_eq!(outcome, ChangeOutcome::Ignored(IgnoreReason::EntityGone));
}

#[tokio::test]
async fn removed_entity_drops_its_documents() {
    let f = fixture(test_entity_synthesizer()).await;
    let key = f
        .source
        .upsert(entity(json!({"id": 1, "text": "t"})))
        .await
        .unwrap();
    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();
    f.source.remove(&key).await;

    // A text id names the same row as the numeric one stored.
    assert_eq!(f.tracker.on_entity_removed(&json!("1")).await.unwrap(), 1);
    assert!(f.index.documents().await.is_empty());
}

#[tokio::test]
async fn snapshot_skips_the_source() {
    let f = fixture(test_entity_synthesizer()).await;
    let outcome = f
        .tracker
        .on_entity_snapshot(&entity(json!({"id": "a-1", "text": "t"})), None)
        .await
        .unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.inserted == 1));
    assert!(f.source.is_empty().await);
}

#[tokio::test]
async fn field_order_determines_content() {
    let row = entity(json!({"id": 1, "a": "first", "b": "second"}));
    let ab = DocumentSynthesizer::new(
        vec![ContentField::new("a"), ContentField::new("b")],
        vec![],
    );
    let ba = DocumentSynthesizer::new(
        vec![ContentField::new("b"), ContentField::new("a")],
        vec![],
    );

    assert_eq!(ab.synthesize(&row), ab.synthesize(&row));
    assert_eq!(ab.synthesize(&row).content, "first second");
    assert_eq!(ba.synthesize(&row).content, "second first");

    // Reordering fields makes the stored content stale.
    let f = fixture(ab).await;
    f.source.upsert(row.clone()).await.unwrap();
    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();
    let reordered = ChangeTracker::new(f.tracker.store().clone(), f.source.clone(), ba);
    let outcome = reordered.on_entity_changed(&json!(1), None).await.unwrap();
    assert!(matches!(outcome, ChangeOutcome::Reconciled(o) if o.replaced == 1));
}

#[tokio::test]
async fn transforms_and_hydrated_relations() {
    let synthesizer = DocumentSynthesizer::new(
        vec![
            ContentField::with_transform("text", |v| {
                v.as_str()
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("transformed text: {s}"))
            }),
            ContentField::with_transform("json_object", |v| {
                (!v.is_null()).then(|| format!("transformed: {v}"))
            }),
            ContentField::with_transform("relations", |v| {
                let titles: Vec<&str> = v
                    .as_array()?
                    .iter()
                    .filter_map(|r| r.get("title").and_then(Value::as_str))
                    .collect();
                Some(format!("Rel: {}", titles.join(", ")))
            }),
        ],
        vec![],
    );
    let f = fixture(synthesizer).await;
    f.source
        .upsert(entity(json!({
            "id": 1,
            "text": "text",
            "json_object": {"key1": "key1"},
            "notEmbedding": "notEmbedding",
            "relations": [{"id": 1, "title": "rel1"}]
        })))
        .await
        .unwrap();

    f.tracker.on_entity_changed(&json!(1), None).await.unwrap();

    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].content,
        r#"transformed text: text transformed: {"key1":"key1"} Rel: rel1"#
    );
}

#[tokio::test]
async fn concurrent_notifications_converge_on_latest_row() {
    let f = fixture(test_entity_synthesizer()).await;
    let key = f
        .source
        .upsert(entity(json!({"id": 1, "text": "v0"})))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 1..=8 {
        f.source
            .update(&key, entity(json!({"text": format!("v{i}")})))
            .await
            .unwrap();
        let tracker = Arc::clone(&f.tracker);
        handles.push(tokio::spawn(async move {
            tracker
                .on_entity_changed(&json!(1), Some(&columns(&["text"])))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = f.index.documents().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "v8");
}

#[derive(serde::Serialize)]
struct ArticleRow {
    id: i64,
    text: String,
    optional: Option<String>,
}

#[tokio::test]
async fn typed_rows_convert_to_entities() {
    let f = fixture(test_entity_synthesizer()).await;
    let row = ArticleRow {
        id: 9,
        text: "typed".to_string(),
        optional: None,
    };
    let entity = vecsync_sync::entity_from_serialize(&row).unwrap();

    f.tracker.on_entity_snapshot(&entity, None).await.unwrap();

    let stored = f.index.documents().await;
    assert_eq!(stored[0].content, "typed");
    assert_eq!(stored[0].metadata.get("id"), Some(&json!(9)));
    assert_eq!(stored[0].metadata.get("optional"), Some(&Value::Null));
}
