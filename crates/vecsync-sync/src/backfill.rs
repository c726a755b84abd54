use std::sync::Arc;

use tokio::task::JoinHandle;
use vecsync_core::{EntitySource, LogicalKey, SyncError};

use crate::store::VectorStore;
use crate::synthesizer::DocumentSynthesizer;

/// Summary of one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Keys considered.
    pub scanned: usize,
    /// Keys with no indexed document when the run started.
    pub missing: usize,
    /// Documents written.
    pub inserted: usize,
    /// Missing keys left alone: the row vanished, has no content, or was
    /// indexed concurrently.
    pub skipped: usize,
}

/// Indexes source rows that have no document in the index yet.
///
/// Existing documents are never compared, truncated or re-embedded, so a run
/// over a fully indexed table issues one read and no writes.
pub struct BackfillCoordinator {
    store: Arc<VectorStore>,
    source: Arc<dyn EntitySource>,
    synthesizer: DocumentSynthesizer,
}

impl BackfillCoordinator {
    pub fn new(
        store: Arc<VectorStore>,
        source: Arc<dyn EntitySource>,
        synthesizer: DocumentSynthesizer,
    ) -> Self {
        Self {
            store,
            source,
            synthesizer,
        }
    }

    /// Backfill every row the source knows about.
    pub async fn backfill_all(&self) -> Result<BackfillReport, SyncError> {
        let keys = self.source.all_keys().await?;
        self.backfill(&keys).await
    }

    /// Backfill the subset of `keys` missing from the index.
    pub async fn backfill(&self, keys: &[LogicalKey]) -> Result<BackfillReport, SyncError> {
        let key_name = self.store.key_name();
        let table = self.store.table_name();
        let mut report = BackfillReport {
            scanned: keys.len(),
            ..Default::default()
        };

        let missing = self.store.index().missing_keys(key_name, keys).await?;
        report.missing = missing.len();
        if missing.is_empty() {
            tracing::info!(target: "vecsync::backfill", table = %table, scanned = report.scanned, "index is complete");
            return Ok(report);
        }
        tracing::info!(
            target: "vecsync::backfill",
            table = %table,
            scanned = report.scanned,
            missing = report.missing,
            "backfilling unindexed rows"
        );

        for chunk in missing.chunks(self.store.options().chunk_size) {
            let _guards = self.store.locks().lock_all(chunk).await;

            // A change notification may have indexed some keys meanwhile.
            let still_missing = self.store.index().missing_keys(key_name, chunk).await?;
            report.skipped += chunk.len() - still_missing.len();

            let entities = self.source.fetch_many(&still_missing).await?;
            report.skipped += still_missing.len() - entities.len();

            let mut docs = Vec::with_capacity(entities.len());
            for entity in &entities {
                if self.synthesizer.has_content(entity) {
                    docs.push(self.synthesizer.synthesize(entity));
                } else {
                    report.skipped += 1;
                }
            }

            report.inserted += self.store.add_documents(docs).await?.len();
        }

        tracing::info!(
            target: "vecsync::backfill",
            table = %table,
            inserted = report.inserted,
            skipped = report.skipped,
            "backfill finished"
        );
        Ok(report)
    }

    /// Run [`backfill_all`](Self::backfill_all) in the background.
    ///
    /// Failures are logged and reported as `None`; they never reach the
    /// caller's task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Option<BackfillReport>> {
        tokio::spawn(async move {
            match self.backfill_all().await {
                Ok(report) => Some(report),
                Err(e) => {
                    self.log_failure(&e);
                    None
                }
            }
        })
    }

    /// Run [`backfill`](Self::backfill) over `keys` in the background.
    pub fn spawn_with_keys(self: Arc<Self>, keys: Vec<LogicalKey>) -> JoinHandle<Option<BackfillReport>> {
        tokio::spawn(async move {
            match self.backfill(&keys).await {
                Ok(report) => Some(report),
                Err(e) => {
                    self.log_failure(&e);
                    None
                }
            }
        })
    }

    fn log_failure(&self, error: &SyncError) {
        tracing::error!(
            target: "vecsync::backfill",
            table = %self.store.table_name(),
            error = %error,
            retryable = error.is_retryable(),
            "backfill failed"
        );
    }
}
