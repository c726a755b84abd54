mod in_memory;

pub use in_memory::{InMemoryVectorIndex, WriteLog};

// Re-export core traits/types for convenience.
pub use vecsync_core::{Document, Embeddings, IndexedDocument, MetadataFilter, VectorIndex};
