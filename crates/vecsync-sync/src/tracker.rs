use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use vecsync_core::{Entity, EntitySource, LogicalKey, SyncError};

use crate::reconciler::ReconcileOutcome;
use crate::store::VectorStore;
use crate::synthesizer::DocumentSynthesizer;

/// Why a change notification produced no index work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// None of the changed columns is a content or metadata field.
    UntrackedColumns,
    /// The row no longer exists in the source.
    EntityGone,
    /// An inserted row carries no content field at all.
    NoContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Ignored(IgnoreReason),
    Reconciled(ReconcileOutcome),
}

impl ChangeOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, ChangeOutcome::Ignored(_))
    }
}

/// Turns row change notifications into index reconciliation.
///
/// Updates that only touch untracked columns cost nothing: no source read,
/// no index read, no embedding call. Everything else re-reads the row under
/// the key lock, so the last notification processed always reflects the
/// latest committed row.
pub struct ChangeTracker {
    store: Arc<VectorStore>,
    source: Arc<dyn EntitySource>,
    synthesizer: DocumentSynthesizer,
}

impl ChangeTracker {
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

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn synthesizer(&self) -> &DocumentSynthesizer {
        &self.synthesizer
    }

    /// Handle an insert (`changed == None`) or an update of `changed` columns
    /// for the row with primary key `id`.
    pub async fn on_entity_changed(
        &self,
        id: &Value,
        changed: Option<&HashSet<String>>,
    ) -> Result<ChangeOutcome, SyncError> {
        if let Some(columns) = changed {
            if !self.synthesizer.tracks_any(columns) {
                tracing::trace!(
                    target: "vecsync::reconcile",
                    table = %self.store.table_name(),
                    "change touches no tracked column"
                );
                return Ok(ChangeOutcome::Ignored(IgnoreReason::UntrackedColumns));
            }
        }
        let key = Self::key_of(id)?;

        let _guard = self.store.locks().lock(&key).await;
        let entity = match self.source.fetch(&key).await {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                tracing::debug!(
                    target: "vecsync::reconcile",
                    table = %self.store.table_name(),
                    key = %key,
                    "entity vanished before reconciliation"
                );
                return Ok(ChangeOutcome::Ignored(IgnoreReason::EntityGone));
            }
            Err(e) => {
                self.log_failure(&key, &e);
                return Err(e);
            }
        };
        self.reconcile_locked(&key, &entity, changed.is_none()).await
    }

    /// Like [`on_entity_changed`](Self::on_entity_changed) for callers that
    /// already hold the hydrated row, skipping the source read.
    pub async fn on_entity_snapshot(
        &self,
        entity: &Entity,
        changed: Option<&HashSet<String>>,
    ) -> Result<ChangeOutcome, SyncError> {
        if let Some(columns) = changed {
            if !self.synthesizer.tracks_any(columns) {
                return Ok(ChangeOutcome::Ignored(IgnoreReason::UntrackedColumns));
            }
        }
        let id = entity
            .get(self.synthesizer.entity_key_field())
            .unwrap_or(&Value::Null);
        let key = Self::key_of(id)?;

        let _guard = self.store.locks().lock(&key).await;
        self.reconcile_locked(&key, entity, changed.is_none()).await
    }

    /// Remove every indexed document of a deleted row.
    pub async fn on_entity_removed(&self, id: &Value) -> Result<usize, SyncError> {
        let key = Self::key_of(id)?;

        let _guard = self.store.locks().lock(&key).await;
        let index = self.store.index();
        let ids: Vec<Uuid> = index
            .find_by_keys(self.store.key_name(), std::slice::from_ref(&key))
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        if !ids.is_empty() {
            index.delete_by_ids(&ids).await.inspect_err(|e| self.log_failure(&key, e))?;
        }
        tracing::debug!(
            target: "vecsync::reconcile",
            table = %self.store.table_name(),
            key = %key,
            deleted = ids.len(),
            "removed documents of deleted entity"
        );
        Ok(ids.len())
    }

    async fn reconcile_locked(
        &self,
        key: &LogicalKey,
        entity: &Entity,
        inserted: bool,
    ) -> Result<ChangeOutcome, SyncError> {
        if inserted && !self.synthesizer.has_content(entity) {
            return Ok(ChangeOutcome::Ignored(IgnoreReason::NoContent));
        }

        let document = self.synthesizer.synthesize(entity);
        match self.store.reconciler().apply(vec![document]).await {
            Ok(outcome) => Ok(ChangeOutcome::Reconciled(outcome)),
            Err(e) => {
                self.log_failure(key, &e);
                Err(e)
            }
        }
    }

    fn key_of(id: &Value) -> Result<LogicalKey, SyncError> {
        LogicalKey::from_value(id)
            .ok_or_else(|| SyncError::MissingKey(format!("unusable entity id {id}")))
    }

    fn log_failure(&self, key: &LogicalKey, error: &SyncError) {
        tracing::error!(
            target: "vecsync::reconcile",
            table = %self.store.table_name(),
            key = %key,
            error = %error,
            retryable = error.is_retryable(),
            "reconciliation failed"
        );
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("table", &self.store.table_name())
            .field("synthesizer", &self.synthesizer)
            .finish()
    }
}
