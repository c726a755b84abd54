use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use vecsync_core::{EntitySource, SyncError};

use crate::backfill::{BackfillCoordinator, BackfillReport};
use crate::store::VectorStore;
use crate::synthesizer::DocumentSynthesizer;
use crate::tracker::ChangeTracker;

struct Registered {
    store: Arc<VectorStore>,
    tracked: Option<Tracked>,
}

struct Tracked {
    tracker: Arc<ChangeTracker>,
    source: Arc<dyn EntitySource>,
}

/// The vector stores of a process, keyed by table name.
///
/// Built once at startup. Each table may be registered only once.
#[derive(Default)]
pub struct VectorStoreRegistry {
    stores: RwLock<HashMap<String, Registered>>,
}

impl VectorStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store for querying only.
    pub async fn register(&self, store: VectorStore) -> Result<Arc<VectorStore>, SyncError> {
        let store = Arc::new(store);
        self.insert(Registered {
            store: Arc::clone(&store),
            tracked: None,
        })
        .await?;
        Ok(store)
    }

    /// Register a store kept in sync with `source`, returning the tracker
    /// that change notifications for the table should be routed to.
    pub async fn register_tracked(
        &self,
        store: VectorStore,
        source: Arc<dyn EntitySource>,
        synthesizer: DocumentSynthesizer,
    ) -> Result<Arc<ChangeTracker>, SyncError> {
        if synthesizer.document_primary_key() != store.key_name() {
            return Err(SyncError::Config(format!(
                "synthesizer writes the key to `{}` but table `{}` expects `{}`",
                synthesizer.document_primary_key(),
                store.table_name(),
                store.key_name()
            )));
        }
        let store = Arc::new(store);
        let tracker = Arc::new(ChangeTracker::new(
            Arc::clone(&store),
            Arc::clone(&source),
            synthesizer,
        ));
        self.insert(Registered {
            store,
            tracked: Some(Tracked {
                tracker: Arc::clone(&tracker),
                source,
            }),
        })
        .await?;
        Ok(tracker)
    }

    async fn insert(&self, registered: Registered) -> Result<(), SyncError> {
        let table = registered.store.table_name().to_string();
        let mut stores = self.stores.write().await;
        if stores.contains_key(&table) {
            return Err(SyncError::Config(format!(
                "a vector store for table `{table}` is already registered"
            )));
        }
        tracing::debug!(table = %table, tracked = registered.tracked.is_some(), "registered vector store");
        stores.insert(table, registered);
        Ok(())
    }

    pub async fn get(&self, table: &str) -> Option<Arc<VectorStore>> {
        self.stores
            .read()
            .await
            .get(table)
            .map(|r| Arc::clone(&r.store))
    }

    pub async fn tracker(&self, table: &str) -> Option<Arc<ChangeTracker>> {
        self.stores
            .read()
            .await
            .get(table)
            .and_then(|r| r.tracked.as_ref())
            .map(|t| Arc::clone(&t.tracker))
    }

    /// Registered table names, sorted.
    pub async fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.stores.read().await.keys().cloned().collect();
        tables.sort();
        tables
    }

    /// Run `ensure_index` for every registered store concurrently.
    pub async fn ensure_all(&self) -> Result<(), SyncError> {
        let stores: Vec<Arc<VectorStore>> = self
            .stores
            .read()
            .await
            .values()
            .map(|r| Arc::clone(&r.store))
            .collect();
        try_join_all(stores.iter().map(|s| s.ensure_index())).await?;
        Ok(())
    }

    /// Start a background backfill for every tracked store with the
    /// `backfill` option set. Returns immediately.
    pub async fn spawn_backfills(&self) -> Vec<(String, JoinHandle<Option<BackfillReport>>)> {
        let stores = self.stores.read().await;
        let mut handles = Vec::new();
        for (table, registered) in stores.iter() {
            let Some(tracked) = &registered.tracked else {
                continue;
            };
            if !registered.store.options().backfill {
                continue;
            }
            let coordinator = Arc::new(BackfillCoordinator::new(
                Arc::clone(&registered.store),
                Arc::clone(&tracked.source),
                tracked.tracker.synthesizer().clone(),
            ));
            handles.push((table.clone(), coordinator.spawn()));
        }
        handles
    }
}
