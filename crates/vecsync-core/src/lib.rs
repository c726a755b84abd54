use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Default name of the table (or collection) holding indexed documents.
pub const DEFAULT_TABLE_NAME: &str = "document_vectors";
/// Default format-version tag written on every indexed document.
pub const DEFAULT_VERSION: &str = "1";
/// Default metadata field carrying the logical key.
pub const DEFAULT_DOCUMENT_PRIMARY_KEY: &str = "id";
/// Default number of documents embedded and written per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Metadata attached to a document: string keys mapped to JSON values.
pub type Metadata = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for vecsync with variants covering every subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection, timeout or query failure against the backing store.
    #[error("storage error: {0}")]
    Storage(String),
    /// The embedding provider failed for the chunk starting with `content`.
    #[error("embedding error inserting {content:?}: {reason}")]
    Embedding { content: String, reason: String },
    #[error("malformed filter: {0}")]
    MalformedFilter(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("missing logical key: {0}")]
    MissingKey(String),
    #[error("entity source error: {0}")]
    Source(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether retrying the whole operation is safe and may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Embedding { .. })
    }
}

// ---------------------------------------------------------------------------
// Logical key
// ---------------------------------------------------------------------------

/// Canonical text form of a logical key value.
///
/// Strings are kept verbatim; numbers and booleans use their JSON text. This
/// is the same representation PostgreSQL's `->>` operator yields, so keys can
/// be compared on either side of the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalKey(String);

impl LogicalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a key from a scalar JSON value. Returns `None` for null, arrays
    /// and objects, which cannot identify a row.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A candidate document: synthesized text plus metadata. Carries no index id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "pageContent")]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Return the logical key stored under `key_name`, if it is a scalar.
    pub fn logical_key(&self, key_name: &str) -> Option<LogicalKey> {
        self.metadata.get(key_name).and_then(LogicalKey::from_value)
    }
}

/// A document as persisted in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Index-local identifier, generated by the index on insert.
    pub id: Uuid,
    pub version: String,
    #[serde(rename = "pageContent")]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IndexedDocument {
    pub fn logical_key(&self, key_name: &str) -> Option<LogicalKey> {
        self.metadata.get(key_name).and_then(LogicalKey::from_value)
    }

    /// Whether this stored document already represents `candidate`: the
    /// content is byte-equal and the stored metadata contains the candidate's.
    pub fn matches(&self, candidate: &Document) -> bool {
        self.content == candidate.content && metadata_contains(&self.metadata, &candidate.metadata)
    }

    pub fn into_document(self) -> Document {
        Document {
            content: self.content,
            metadata: self.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata filters
// ---------------------------------------------------------------------------

/// A containment filter over document metadata.
///
/// A document matches when its metadata contains every key/value pair of the
/// filter, with PostgreSQL `jsonb @>` semantics for nested objects and arrays.
/// A list of filters is OR-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(Metadata);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching a single key/value pair.
    pub fn pair(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Metadata {
        &self.0
    }

    /// The filter as a JSON object, suitable for binding as `jsonb`.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Whether `metadata` contains this filter.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata_contains(metadata, &self.0)
    }

    /// Reject filters that cannot be encoded into a query predicate.
    ///
    /// Empty keys are refused, as are NUL characters anywhere in keys or
    /// string values (PostgreSQL `jsonb` cannot store them).
    pub fn validate(&self) -> Result<(), SyncError> {
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(SyncError::MalformedFilter(
                    "filter keys must not be empty".to_string(),
                ));
            }
            if key.contains('\0') {
                return Err(SyncError::MalformedFilter(format!(
                    "filter key {key:?} contains a NUL character"
                )));
            }
            validate_filter_value(key, value)?;
        }
        Ok(())
    }
}

impl From<Metadata> for MetadataFilter {
    fn from(value: Metadata) -> Self {
        Self(value)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for MetadataFilter {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn validate_filter_value(key: &str, value: &Value) -> Result<(), SyncError> {
    match value {
        Value::String(s) if s.contains('\0') => Err(SyncError::MalformedFilter(format!(
            "value for {key:?} contains a NUL character"
        ))),
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| validate_filter_value(key, item)),
        Value::Object(map) => map.iter().try_for_each(|(k, v)| {
            if k.contains('\0') {
                Err(SyncError::MalformedFilter(format!(
                    "nested key under {key:?} contains a NUL character"
                )))
            } else {
                validate_filter_value(key, v)
            }
        }),
        _ => Ok(()),
    }
}

/// Whether `stored` contains every pair of `subset` (`jsonb @>` semantics).
pub fn metadata_contains(stored: &Metadata, subset: &Metadata) -> bool {
    subset.iter().all(|(key, expected)| {
        stored
            .get(key)
            .is_some_and(|actual| nested_contains(actual, expected))
    })
}

/// Top-level `jsonb @>` containment between two JSON values.
///
/// Only at the top level does an array contain a bare scalar element.
pub fn json_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Array(outer), scalar) if !scalar.is_array() && !scalar.is_object() => {
            outer.iter().any(|actual| nested_contains(actual, scalar))
        }
        _ => nested_contains(container, contained),
    }
}

/// Containment below the top level: both sides must have the same JSON type.
fn nested_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Object(outer), Value::Object(inner)) => inner.iter().all(|(key, expected)| {
            outer
                .get(key)
                .is_some_and(|actual| nested_contains(actual, expected))
        }),
        (Value::Array(outer), Value::Array(inner)) => inner
            .iter()
            .all(|expected| outer.iter().any(|actual| nested_contains(actual, expected))),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (a, b) => a == b,
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-table options recognized by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    pub table_name: String,
    pub version: String,
    /// Metadata field under which the logical key is stored.
    pub document_primary_key: String,
    pub chunk_size: usize,
    /// Default filter applied to reads unless overridden per call.
    pub filter: Option<MetadataFilter>,
    /// Run a backfill of unindexed rows at startup.
    pub backfill: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            document_primary_key: DEFAULT_DOCUMENT_PRIMARY_KEY.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            filter: None,
            backfill: false,
        }
    }
}

impl StoreOptions {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_document_primary_key(mut self, key: impl Into<String>) -> Self {
        self.document_primary_key = key.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_backfill(mut self, enabled: bool) -> Self {
        self.backfill = enabled;
        self
    }

    /// Parse options from a JSON object, filling in defaults.
    pub fn from_json(value: Value) -> Result<Self, SyncError> {
        let options: Self = serde_json::from_value(value)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.table_name.is_empty() {
            return Err(SyncError::Config("tableName must not be empty".to_string()));
        }
        if self.document_primary_key.is_empty() {
            return Err(SyncError::Config(
                "documentPrimaryKey must not be empty".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunkSize must be > 0".to_string()));
        }
        if let Some(filter) = &self.filter {
            filter
                .validate()
                .map_err(|e| SyncError::Config(format!("invalid default filter: {e}")))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Embeddings trait
// ---------------------------------------------------------------------------

/// Trait for embedding text into vectors.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed multiple texts (for batch document embedding).
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SyncError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SyncError>;
}

// ---------------------------------------------------------------------------
// VectorIndex trait
// ---------------------------------------------------------------------------

/// Storage backend for indexed documents and their embeddings.
///
/// Implementations own id generation, chunked writes and distance scoring.
/// Documents are never updated in place: a changed document is deleted and
/// inserted again.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name, e.g. `"pgvector"`.
    fn index_type(&self) -> &'static str;

    /// Version tag written on inserted documents.
    fn version(&self) -> &str;

    /// Documents embedded and written per chunk.
    fn chunk_size(&self) -> usize;

    /// Create the backing table/collection if absent. Idempotent.
    async fn ensure_index(&self) -> Result<(), SyncError>;

    /// Embed and write `docs` in fixed-size chunks, returning the generated
    /// ids. Chunks committed before a failure stay committed.
    async fn insert_batch(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Uuid>, SyncError>;

    /// Documents whose metadata contains at least one of `filters`.
    async fn find_by_metadata(
        &self,
        filters: &[MetadataFilter],
    ) -> Result<Vec<IndexedDocument>, SyncError>;

    /// Documents whose `key_name` metadata, in [`LogicalKey`] text form,
    /// equals one of `keys`. `7` and `"7"` name the same key here.
    async fn find_by_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<IndexedDocument>, SyncError>;

    /// Delete documents by index-local id.
    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<(), SyncError>;

    /// Up to `k` nearest documents by ascending distance.
    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedDocument, f32)>, SyncError>;

    /// The subset of `keys` with no document stored under `key_name`.
    async fn missing_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<LogicalKey>, SyncError>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize, SyncError>;
}

// ---------------------------------------------------------------------------
// EntitySource trait
// ---------------------------------------------------------------------------

/// A hydrated source row: column (or relation) names mapped to JSON values.
pub type Entity = serde_json::Map<String, Value>;

/// Convert any serializable row type into an [`Entity`].
pub fn entity_from_serialize<T: Serialize>(row: &T) -> Result<Entity, SyncError> {
    match serde_json::to_value(row)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Source(format!(
            "entity must serialize to a JSON object, got {other}"
        ))),
    }
}

/// Read access to the relational table being indexed.
///
/// Implementations return rows hydrated with every relation the content
/// fields need, keyed by the row's primary key in [`LogicalKey`] form.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetch one row, or `None` if it no longer exists.
    async fn fetch(&self, key: &LogicalKey) -> Result<Option<Entity>, SyncError>;

    /// Fetch several rows; keys with no row are skipped.
    async fn fetch_many(&self, keys: &[LogicalKey]) -> Result<Vec<Entity>, SyncError> {
        let mut entities = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entity) = self.fetch(key).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Primary keys of every row in the table.
    async fn all_keys(&self) -> Result<Vec<LogicalKey>, SyncError>;
}
