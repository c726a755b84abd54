//! Keeps a vector index in agreement with a relational table.
//!
//! The pieces, leaf first:
//!
//! - [`DocumentSynthesizer`] turns a hydrated row into a [`Document`] using an
//!   ordered list of content fields and a list of metadata fields.
//! - [`Reconciler`] compares candidate documents with what the index holds
//!   for the same logical keys and deletes/inserts only what drifted.
//! - [`VectorStore`] is the per-table query surface (search, find, delete,
//!   add, upsert) over a [`VectorIndex`](vecsync_core::VectorIndex).
//! - [`ChangeTracker`] receives row change notifications and decides whether
//!   they touch tracked columns at all.
//! - [`BackfillCoordinator`] indexes rows that are missing from the index,
//!   once, at startup.
//! - [`VectorStoreRegistry`] owns the stores and trackers of a process, keyed
//!   by table name.

mod backfill;
mod locks;
mod reconciler;
mod registry;
mod source;
mod store;
mod synthesizer;
mod tracker;

pub use backfill::{BackfillCoordinator, BackfillReport};
pub use locks::{KeyGuards, KeyLocks};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use registry::VectorStoreRegistry;
pub use source::InMemoryEntitySource;
pub use store::{VectorStore, VectorStoreBuilder};
pub use synthesizer::{
    default_content_transform, ContentField, ContentTransform, DocumentSynthesizer,
    MetadataField, MetadataTransform,
};
pub use tracker::{ChangeOutcome, ChangeTracker, IgnoreReason};

// Re-export core traits/types for convenience.
pub use vecsync_core::{
    entity_from_serialize, Document, Embeddings, Entity, EntitySource, IndexedDocument,
    LogicalKey, MetadataFilter, StoreOptions, SyncError, VectorIndex,
};
