use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;
use vecsync_core::{Document, Embeddings, IndexedDocument, LogicalKey, SyncError, VectorIndex};

use crate::locks::KeyLocks;

/// What a reconciliation pass did, counted per logical key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Keys with no stored document that were inserted.
    pub inserted: usize,
    /// Keys whose stored documents were deleted and re-inserted.
    pub replaced: usize,
    /// Keys whose stored document already matched.
    pub skipped: usize,
    /// Stored documents removed, including collapsed duplicates.
    pub deleted: usize,
}

impl ReconcileOutcome {
    /// True when the pass issued no writes at all.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.replaced == 0 && self.deleted == 0
    }

    pub fn writes(&self) -> usize {
        self.inserted + self.replaced
    }
}

enum Decision {
    Insert,
    Replace(Vec<Uuid>),
    Skip(Vec<Uuid>),
}

/// Compare-and-write engine behind `upsert_documents` and change tracking.
///
/// For each candidate the stored documents sharing its logical key (compared
/// as text, so `7` and `"7"` are one key) are looked up in one batched read. A stored document whose content is
/// byte-identical and whose metadata contains the candidate's metadata
/// leaves the key untouched; anything else is deleted and the candidate
/// inserted in its place.
pub struct Reconciler {
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn Embeddings>,
    key_name: String,
    locks: Arc<KeyLocks>,
}

impl Reconciler {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn Embeddings>,
        key_name: impl Into<String>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            index,
            embeddings,
            key_name: key_name.into(),
            locks,
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Reconcile `candidates`, holding the key locks for the whole pass.
    pub async fn reconcile(&self, candidates: Vec<Document>) -> Result<ReconcileOutcome, SyncError> {
        let keyed = self.keyed(candidates)?;
        let _guards = self.locks.lock_all(keyed.iter().map(|(k, _)| k)).await;
        self.apply_keyed(keyed).await
    }

    /// Reconcile with the caller already holding the locks for every key.
    pub(crate) async fn apply(&self, candidates: Vec<Document>) -> Result<ReconcileOutcome, SyncError> {
        let keyed = self.keyed(candidates)?;
        self.apply_keyed(keyed).await
    }

    /// Attach logical keys and collapse duplicates. The last candidate for a
    /// key wins but keeps the position of the key's first appearance.
    fn keyed(&self, candidates: Vec<Document>) -> Result<Vec<(LogicalKey, Document)>, SyncError> {
        let mut positions: HashMap<LogicalKey, usize> = HashMap::new();
        let mut keyed: Vec<(LogicalKey, Document)> = Vec::with_capacity(candidates.len());

        for doc in candidates {
            let key = doc.logical_key(&self.key_name).ok_or_else(|| {
                SyncError::MissingKey(format!(
                    "document metadata has no usable `{}`",
                    self.key_name
                ))
            })?;
            match positions.get(&key) {
                Some(&pos) => keyed[pos].1 = doc,
                None => {
                    positions.insert(key.clone(), keyed.len());
                    keyed.push((key, doc));
                }
            }
        }
        Ok(keyed)
    }

    async fn apply_keyed(
        &self,
        keyed: Vec<(LogicalKey, Document)>,
    ) -> Result<ReconcileOutcome, SyncError> {
        let mut outcome = ReconcileOutcome::default();
        if keyed.is_empty() {
            return Ok(outcome);
        }

        let keys: Vec<LogicalKey> = keyed.iter().map(|(k, _)| k.clone()).collect();
        let existing = self.index.find_by_keys(&self.key_name, &keys).await?;

        let mut by_key: HashMap<LogicalKey, Vec<IndexedDocument>> = HashMap::new();
        for stored in existing {
            if let Some(key) = stored.logical_key(&self.key_name) {
                by_key.entry(key).or_default().push(stored);
            }
        }

        let mut doomed: Vec<Uuid> = Vec::new();
        let mut inserts: Vec<Document> = Vec::new();

        for (key, candidate) in keyed {
            let stored = by_key.remove(&key).unwrap_or_default();
            match decide(&stored, &candidate) {
                Decision::Insert => {
                    outcome.inserted += 1;
                    inserts.push(candidate);
                }
                Decision::Replace(ids) => {
                    outcome.replaced += 1;
                    doomed.extend(ids);
                    inserts.push(candidate);
                }
                Decision::Skip(duplicates) => {
                    outcome.skipped += 1;
                    doomed.extend(duplicates);
                }
            }
        }

        if !doomed.is_empty() {
            self.index.delete_by_ids(&doomed).await?;
            outcome.deleted = doomed.len();
        }
        if !inserts.is_empty() {
            self.index
                .insert_batch(inserts, self.embeddings.as_ref())
                .await?;
        }

        tracing::debug!(
            target: "vecsync::reconcile",
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            skipped = outcome.skipped,
            deleted = outcome.deleted,
            "reconciled batch"
        );
        Ok(outcome)
    }
}

/// Per-key decision. Of several stored documents, the first matching one is
/// kept and the rest are collapsed.
fn decide(stored: &[IndexedDocument], candidate: &Document) -> Decision {
    if stored.is_empty() {
        return Decision::Insert;
    }
    match stored.iter().position(|s| s.matches(candidate)) {
        Some(keep) => Decision::Skip(
            stored
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != keep)
                .map(|(_, s)| s.id)
                .collect(),
        ),
        None => Decision::Replace(stored.iter().map(|s| s.id).collect()),
    }
}
