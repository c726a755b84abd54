//! vecsync: keep a vector-embedding index in sync with a relational table.
//!
//! This crate re-exports the vecsync sub-crates for single-import usage.
//! Enable features to control which modules are available.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | `sync`, `in-memory`, `embeddings` |
//! | `sync` | Synthesizer, reconciler, change tracker, backfill, registry |
//! | `in-memory` | `InMemoryVectorIndex` |
//! | `embeddings` | `FakeEmbeddings` and `CountingEmbeddings` |
//! | `pgvector` | PostgreSQL + pgvector index and entity source |
//! | `full` | All features enabled |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vecsync::core::StoreOptions;
//! use vecsync::pgvector::{PgEntitySource, PgVectorConfig, PgVectorIndex};
//! use vecsync::sync::{ContentField, DocumentSynthesizer, MetadataField, VectorStore, VectorStoreRegistry};
//!
//! let options = StoreOptions::new("article_vectors").with_backfill(true);
//! let index = PgVectorIndex::new(pool.clone(), PgVectorConfig::from_options(&options, 1536)?);
//! let store = VectorStore::builder(options)
//!     .embeddings(Arc::new(my_embeddings))
//!     .index(Arc::new(index))
//!     .connect()
//!     .await?;
//!
//! let synthesizer = DocumentSynthesizer::new(
//!     vec![ContentField::new("title"), ContentField::new("body")],
//!     vec![MetadataField::new("author_id")],
//! );
//! let registry = VectorStoreRegistry::new();
//! let tracker = registry
//!     .register_tracked(store, Arc::new(PgEntitySource::new(pool, "articles", "id")?), synthesizer)
//!     .await?;
//! registry.spawn_backfills().await;
//!
//! // From the row change hook:
//! tracker.on_entity_changed(&serde_json::json!(42), Some(&changed_columns)).await?;
//! ```

/// Core types and traits: `Document`, `MetadataFilter`, `StoreOptions`,
/// `SyncError`, `Embeddings`, `VectorIndex`, `EntitySource`. Always available.
pub use vecsync_core as core;

/// Deterministic embedding providers for tests and demos.
#[cfg(feature = "embeddings")]
pub use vecsync_embeddings as embeddings;

/// In-memory vector index.
#[cfg(feature = "in-memory")]
pub use vecsync_vectorstores as vectorstores;

/// PostgreSQL + pgvector index and entity source.
#[cfg(feature = "pgvector")]
pub use vecsync_pgvector as pgvector;

/// Document synthesis, reconciliation, change tracking and backfill.
#[cfg(feature = "sync")]
pub use vecsync_sync as sync;
