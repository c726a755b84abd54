use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use vecsync_core::{Entity, EntitySource, LogicalKey, SyncError};

/// An [`EntitySource`] backed by a map, for tests and embedded use.
///
/// Rows are keyed by the canonical text of their primary key column.
pub struct InMemoryEntitySource {
    primary_key: String,
    rows: RwLock<BTreeMap<LogicalKey, Entity>>,
}

impl InMemoryEntitySource {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Insert or replace a whole row.
    pub async fn upsert(&self, entity: Entity) -> Result<LogicalKey, SyncError> {
        let key = entity
            .get(&self.primary_key)
            .and_then(LogicalKey::from_value)
            .ok_or_else(|| {
                SyncError::MissingKey(format!("row has no usable `{}`", self.primary_key))
            })?;
        self.rows.write().await.insert(key.clone(), entity);
        Ok(key)
    }

    /// Merge `patch` into an existing row and return the names of the columns
    /// whose value actually changed, or `None` if the row does not exist.
    pub async fn update(&self, key: &LogicalKey, patch: Entity) -> Option<HashSet<String>> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(key)?;
        let mut changed = HashSet::new();
        for (column, value) in patch {
            if row.get(&column) != Some(&value) {
                changed.insert(column.clone());
                row.insert(column, value);
            }
        }
        Some(changed)
    }

    pub async fn remove(&self, key: &LogicalKey) -> Option<Entity> {
        self.rows.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl EntitySource for InMemoryEntitySource {
    async fn fetch(&self, key: &LogicalKey) -> Result<Option<Entity>, SyncError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn fetch_many(&self, keys: &[LogicalKey]) -> Result<Vec<Entity>, SyncError> {
        let rows = self.rows.read().await;
        Ok(keys.iter().filter_map(|k| rows.get(k).cloned()).collect())
    }

    async fn all_keys(&self) -> Result<Vec<LogicalKey>, SyncError> {
        Ok(self.rows.read().await.keys().cloned().collect())
    }
}
