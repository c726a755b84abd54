mod counting;
mod fake;

pub use counting::CountingEmbeddings;
pub use fake::FakeEmbeddings;

// Re-export the Embeddings trait from core (forward-declared there).
pub use vecsync_core::Embeddings;
