use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vecsync_core::{Embeddings, SyncError};

/// Wraps another provider and records the size of every batch call.
///
/// Embedding calls are the expensive part of keeping an index in sync; this
/// wrapper makes them observable, e.g. to assert that an unrelated column
/// update did not embed anything.
pub struct CountingEmbeddings {
    inner: Arc<dyn Embeddings>,
    batches: Mutex<Vec<usize>>,
    queries: Mutex<usize>,
}

impl CountingEmbeddings {
    pub fn new(inner: Arc<dyn Embeddings>) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
            queries: Mutex::new(0),
        }
    }

    /// Sizes of the `embed_documents` calls so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Total number of texts embedded through `embed_documents`.
    pub fn documents_embedded(&self) -> usize {
        self.batch_sizes().iter().sum()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| *q).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
        if let Ok(mut queries) = self.queries.lock() {
            *queries = 0;
        }
    }
}

#[async_trait]
impl Embeddings for CountingEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SyncError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(texts.len());
        }
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SyncError> {
        if let Ok(mut queries) = self.queries.lock() {
            *queries += 1;
        }
        self.inner.embed_query(text).await
    }
}
