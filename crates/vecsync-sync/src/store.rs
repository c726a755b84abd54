use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;
use vecsync_core::{
    Document, Embeddings, IndexedDocument, LogicalKey, MetadataFilter, StoreOptions, SyncError,
    VectorIndex,
};

use crate::locks::KeyLocks;
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// The query surface of one indexed table.
///
/// Writes that touch a logical key (`upsert_documents`, `delete_documents`
/// with a key filter, change notifications) are serialized per key; reads are
/// never blocked.
pub struct VectorStore {
    options: StoreOptions,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn Embeddings>,
    locks: Arc<KeyLocks>,
    reconciler: Reconciler,
}

/// Builder for [`VectorStore`]. Both an embedding provider and an index are
/// required.
pub struct VectorStoreBuilder {
    options: StoreOptions,
    embeddings: Option<Arc<dyn Embeddings>>,
    index: Option<Arc<dyn VectorIndex>>,
}

impl VectorStoreBuilder {
    pub fn embeddings(mut self, embeddings: Arc<dyn Embeddings>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Validate the options and assemble the store without touching storage.
    ///
    /// The index must have been built from the same options: a differing
    /// `chunk_size` or `version` is a [`SyncError::Config`].
    pub fn build(self) -> Result<VectorStore, SyncError> {
        self.options.validate()?;
        let embeddings = self.embeddings.ok_or_else(|| {
            SyncError::Config(format!(
                "no embedding provider configured for `{}`",
                self.options.table_name
            ))
        })?;
        let index = self.index.ok_or_else(|| {
            SyncError::Config(format!(
                "no vector index configured for `{}`",
                self.options.table_name
            ))
        })?;

        if index.chunk_size() != self.options.chunk_size {
            return Err(SyncError::Config(format!(
                "index for `{}` writes chunks of {} but chunkSize is {}",
                self.options.table_name,
                index.chunk_size(),
                self.options.chunk_size
            )));
        }
        if index.version() != self.options.version {
            return Err(SyncError::Config(format!(
                "index for `{}` writes version {:?} but version is {:?}",
                self.options.table_name,
                index.version(),
                self.options.version
            )));
        }

        let locks = Arc::new(KeyLocks::new());
        let reconciler = Reconciler::new(
            Arc::clone(&index),
            Arc::clone(&embeddings),
            self.options.document_primary_key.clone(),
            Arc::clone(&locks),
        );
        Ok(VectorStore {
            options: self.options,
            index,
            embeddings,
            locks,
            reconciler,
        })
    }

    /// Build, then make sure the backing table exists.
    pub async fn connect(self) -> Result<VectorStore, SyncError> {
        let store = self.build()?;
        store.ensure_index().await?;
        tracing::info!(
            table = %store.options.table_name,
            index = store.index.index_type(),
            "vector store ready"
        );
        Ok(store)
    }
}

impl VectorStore {
    pub fn builder(options: StoreOptions) -> VectorStoreBuilder {
        VectorStoreBuilder {
            options,
            embeddings: None,
            index: None,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn table_name(&self) -> &str {
        &self.options.table_name
    }

    /// Metadata field holding the logical key.
    pub fn key_name(&self) -> &str {
        &self.options.document_primary_key
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embeddings(&self) -> &Arc<dyn Embeddings> {
        &self.embeddings
    }

    pub(crate) fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    pub(crate) fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn ensure_index(&self) -> Result<(), SyncError> {
        self.index.ensure_index().await
    }

    pub async fn count(&self) -> Result<usize, SyncError> {
        self.index.count().await
    }

    /// Embed `query` and return up to `k` nearest documents with their
    /// distances. `filter` replaces the configured default filter.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedDocument, f32)>, SyncError> {
        let embedding = self.embeddings.embed_query(query).await?;
        self.similarity_search_by_vector(&embedding, k, filter).await
    }

    pub async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedDocument, f32)>, SyncError> {
        let filter = filter.or(self.options.filter.as_ref());
        self.index
            .similarity_search_by_vector(embedding, k, filter)
            .await
    }

    /// Documents matching any of `filters`. With no filters the configured
    /// default filter is used; without one, nothing matches.
    pub async fn find_documents(
        &self,
        filters: &[MetadataFilter],
    ) -> Result<Vec<IndexedDocument>, SyncError> {
        if !filters.is_empty() {
            return self.index.find_by_metadata(filters).await;
        }
        match &self.options.filter {
            Some(default) => {
                self.index
                    .find_by_metadata(std::slice::from_ref(default))
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Delete every document matching any of `filters`, returning how many
    /// were removed. An empty filter would match everything and is rejected.
    pub async fn delete_documents(&self, filters: &[MetadataFilter]) -> Result<usize, SyncError> {
        for filter in filters {
            filter.validate()?;
            if filter.is_empty() {
                return Err(SyncError::MalformedFilter(
                    "empty filter would delete every document".to_string(),
                ));
            }
        }
        if filters.is_empty() {
            return Ok(0);
        }

        let keys: Vec<LogicalKey> = filters
            .iter()
            .filter_map(|f| f.get(self.key_name()).and_then(LogicalKey::from_value))
            .collect();
        let _guards = self.locks.lock_all(&keys).await;

        // Filters naming only the key match by key text, like the reconciler.
        let (by_key, by_metadata): (Vec<&MetadataFilter>, Vec<&MetadataFilter>) =
            filters.iter().partition(|f| self.key_only(f).is_some());
        let key_only: Vec<LogicalKey> = by_key.iter().filter_map(|f| self.key_only(f)).collect();
        let by_metadata: Vec<MetadataFilter> = by_metadata.into_iter().cloned().collect();

        let mut found = self.index.find_by_keys(self.key_name(), &key_only).await?;
        found.extend(self.index.find_by_metadata(&by_metadata).await?);
        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = found
            .into_iter()
            .map(|d| d.id)
            .filter(|id| seen.insert(*id))
            .collect();
        if !ids.is_empty() {
            self.index.delete_by_ids(&ids).await?;
        }
        tracing::debug!(
            target: "vecsync::index",
            table = %self.options.table_name,
            deleted = ids.len(),
            "deleted documents"
        );
        Ok(ids.len())
    }

    /// The key of a filter whose only pair is a scalar logical key.
    fn key_only(&self, filter: &MetadataFilter) -> Option<LogicalKey> {
        if filter.as_map().len() != 1 {
            return None;
        }
        filter.get(self.key_name()).and_then(LogicalKey::from_value)
    }

    /// Insert without comparing against stored documents.
    pub async fn add_documents(&self, docs: Vec<Document>) -> Result<Vec<Uuid>, SyncError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        self.index
            .insert_batch(docs, self.embeddings.as_ref())
            .await
    }

    /// Reconcile `docs` against the index: unchanged documents are skipped,
    /// changed ones replaced, new ones inserted.
    pub async fn upsert_documents(&self, docs: Vec<Document>) -> Result<ReconcileOutcome, SyncError> {
        let outcome = self.reconciler.reconcile(docs).await;
        if let Err(e) = &outcome {
            tracing::error!(
                target: "vecsync::reconcile",
                table = %self.options.table_name,
                error = %e,
                "upsert failed"
            );
        }
        outcome
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("options", &self.options)
            .field("index", &self.index.index_type())
            .finish()
    }
}
