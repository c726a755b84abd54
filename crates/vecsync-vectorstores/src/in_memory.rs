use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use vecsync_core::{
    Document, Embeddings, IndexedDocument, LogicalKey, MetadataFilter, StoreOptions, SyncError,
    VectorIndex, DEFAULT_CHUNK_SIZE, DEFAULT_VERSION,
};

/// Stored document with its embedding vector.
struct StoredEntry {
    document: IndexedDocument,
    embedding: Vec<f32>,
}

/// Record of the write calls an [`InMemoryVectorIndex`] has served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteLog {
    /// Row count of every chunk written by `insert_batch`, in order.
    pub insert_chunks: Vec<usize>,
    /// Number of ids passed to every non-empty `delete_by_ids` call.
    pub deletes: Vec<usize>,
}

impl WriteLog {
    /// Total number of write calls (chunk inserts plus deletes).
    pub fn total(&self) -> usize {
        self.insert_chunks.len() + self.deletes.len()
    }
}

#[derive(Default)]
struct State {
    entries: Vec<StoredEntry>,
    log: WriteLog,
}

/// In-memory [`VectorIndex`] using cosine distance.
///
/// Behaves like the PostgreSQL index: ids are generated on insert, writes are
/// chunked, filters use `jsonb @>` containment. Useful for tests and for
/// processes that rebuild their index at startup.
pub struct InMemoryVectorIndex {
    state: RwLock<State>,
    version: String,
    chunk_size: usize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            version: DEFAULT_VERSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create an index honouring the `version` and `chunk_size` options.
    pub fn with_options(options: &StoreOptions) -> Self {
        Self {
            state: RwLock::new(State::default()),
            version: options.version.clone(),
            chunk_size: options.chunk_size.max(1),
        }
    }

    /// Create a new index pre-populated with documents.
    pub async fn from_documents(
        documents: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Self, SyncError> {
        let index = Self::new();
        index.insert_batch(documents, embeddings).await?;
        Ok(index)
    }

    /// Snapshot of the write calls served so far.
    pub async fn write_log(&self) -> WriteLog {
        self.state.read().await.log.clone()
    }

    /// All stored documents in insertion order.
    pub async fn documents(&self) -> Vec<IndexedDocument> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.document.clone())
            .collect()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn index_type(&self) -> &'static str {
        "in_memory"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn ensure_index(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn insert_batch(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Uuid>, SyncError> {
        let mut ids = Vec::with_capacity(docs.len());

        for chunk in docs.chunks(self.chunk_size) {
            let first = chunk[0].content.clone();
            let texts: Vec<&str> = chunk.iter().map(|d| d.content.as_str()).collect();

            // The lock is only taken once the chunk is embedded.
            let vectors = embeddings
                .embed_documents(&texts)
                .await
                .map_err(|e| SyncError::Embedding {
                    content: first.clone(),
                    reason: e.to_string(),
                })?;
            if vectors.len() != chunk.len() {
                return Err(SyncError::Embedding {
                    content: first,
                    reason: format!(
                        "provider returned {} vectors for {} texts",
                        vectors.len(),
                        chunk.len()
                    ),
                });
            }

            let mut state = self.state.write().await;
            for (doc, embedding) in chunk.iter().zip(vectors) {
                let id = Uuid::new_v4();
                ids.push(id);
                state.entries.push(StoredEntry {
                    document: IndexedDocument {
                        id,
                        version: self.version.clone(),
                        content: doc.content.clone(),
                        metadata: doc.metadata.clone(),
                    },
                    embedding,
                });
            }
            state.log.insert_chunks.push(chunk.len());
            tracing::debug!(target: "vecsync::index", rows = chunk.len(), "in-memory chunk written");
        }

        Ok(ids)
    }

    async fn find_by_metadata(
        &self,
        filters: &[MetadataFilter],
    ) -> Result<Vec<IndexedDocument>, SyncError> {
        for filter in filters {
            filter.validate()?;
        }
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| filters.iter().any(|f| f.matches(&e.document.metadata)))
            .map(|e| e.document.clone())
            .collect())
    }

    async fn find_by_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<IndexedDocument>, SyncError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&LogicalKey> = keys.iter().collect();
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| {
                e.document
                    .logical_key(key_name)
                    .is_some_and(|k| wanted.contains(&k))
            })
            .map(|e| e.document.clone())
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        let doomed: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.state.write().await;
        state.entries.retain(|e| !doomed.contains(&e.document.id));
        state.log.deletes.push(ids.len());
        Ok(())
    }

    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedDocument, f32)>, SyncError> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let state = self.state.read().await;

        let mut scored: Vec<(IndexedDocument, f32)> = state
            .entries
            .iter()
            .filter(|e| filter.is_none_or(|f| f.matches(&e.document.metadata)))
            .filter_map(|e| {
                cosine_distance(embedding, &e.embedding).map(|d| (e.document.clone(), d))
            })
            .collect();

        // Sort by distance ascending
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored)
    }

    async fn missing_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<LogicalKey>, SyncError> {
        let state = self.state.read().await;
        let present: HashSet<LogicalKey> = state
            .entries
            .iter()
            .filter_map(|e| e.document.logical_key(key_name))
            .collect();

        let mut seen = HashSet::new();
        Ok(keys
            .iter()
            .filter(|k| !present.contains(*k) && seen.insert((*k).clone()))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, SyncError> {
        Ok(self.state.read().await.entries.len())
    }
}

/// Cosine distance (`1 - cosine similarity`), matching pgvector's `<=>`.
///
/// Returns `None` when the distance is undefined: mismatched dimensions, a
/// zero-magnitude vector or a non-finite component.
fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }

    let distance = 1.0 - dot / (mag_a * mag_b);
    distance.is_finite().then_some(distance)
}
