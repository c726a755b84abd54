use std::collections::HashSet;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use vecsync_core::{
    Document, Embeddings, IndexedDocument, LogicalKey, Metadata, MetadataFilter, StoreOptions,
    SyncError, VectorIndex, DEFAULT_CHUNK_SIZE, DEFAULT_DOCUMENT_PRIMARY_KEY, DEFAULT_VERSION,
};

use crate::filter::{
    push_containment, push_containment_any, validate_column_name, validate_table_name,
};

/// SQLSTATE codes raised when a concurrent `IF NOT EXISTS` lost the race.
const ALREADY_EXISTS_CODES: [&str; 3] = ["42P07", "42710", "23505"];

/// Configuration for a [`PgVectorIndex`] table.
#[derive(Debug, Clone)]
pub struct PgVectorConfig {
    /// Name of the PostgreSQL table used to store documents and embeddings.
    pub table_name: String,
    /// Dimensionality of the embedding vectors (e.g. 1536 for OpenAI
    /// `text-embedding-ada-002`).
    pub vector_dimensions: u32,
    /// Version tag written on every inserted row.
    pub version: String,
    /// Rows embedded and written per transaction.
    pub chunk_size: usize,
    /// Metadata field holding the logical key; gets its own expression index.
    pub key_field: String,
}

impl PgVectorConfig {
    /// Create a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `table_name` is empty or `vector_dimensions` is zero.
    pub fn new(table_name: impl Into<String>, vector_dimensions: u32) -> Self {
        let table_name = table_name.into();
        assert!(!table_name.is_empty(), "table_name must not be empty");
        assert!(vector_dimensions > 0, "vector_dimensions must be > 0");
        Self {
            table_name,
            vector_dimensions,
            version: DEFAULT_VERSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            key_field: DEFAULT_DOCUMENT_PRIMARY_KEY.to_string(),
        }
    }

    /// Build a configuration from store options, validating both.
    pub fn from_options(options: &StoreOptions, vector_dimensions: u32) -> Result<Self, SyncError> {
        options.validate()?;
        validate_table_name(&options.table_name)?;
        validate_column_name(&options.document_primary_key)?;
        if vector_dimensions == 0 {
            return Err(SyncError::Config("vector_dimensions must be > 0".to_string()));
        }
        Ok(Self {
            table_name: options.table_name.clone(),
            vector_dimensions,
            version: options.version.clone(),
            chunk_size: options.chunk_size,
            key_field: options.document_primary_key.clone(),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }
}

/// A [`VectorIndex`] backed by PostgreSQL with the pgvector extension.
///
/// Documents are stored in a single table with columns:
/// - `id UUID PRIMARY KEY DEFAULT gen_random_uuid()`
/// - `version TEXT`
/// - `"pageContent" TEXT`
/// - `metadata JSONB NOT NULL DEFAULT '{}'`
/// - `embedding vector(<dimensions>)`
///
/// Call [`ensure_index`](VectorIndex::ensure_index) once after construction
/// to create the pgvector extension, the table, a GIN index on `metadata`
/// and a btree index on the logical key (`metadata ->> key_field`).
pub struct PgVectorIndex {
    pool: PgPool,
    config: PgVectorConfig,
}

impl PgVectorIndex {
    /// Create a new index from an existing connection pool and config.
    pub fn new(pool: PgPool, config: PgVectorConfig) -> Self {
        Self { pool, config }
    }

    /// Create the index and make sure its table exists.
    pub async fn connect(pool: PgPool, config: PgVectorConfig) -> Result<Self, SyncError> {
        let index = Self::new(pool, config);
        index.ensure_index().await?;
        Ok(index)
    }

    /// Return a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &PgVectorConfig {
        &self.config
    }

    fn table(&self) -> Result<&str, SyncError> {
        validate_table_name(&self.config.table_name)?;
        Ok(&self.config.table_name)
    }

    /// Embed one chunk and write it in a single transaction.
    async fn insert_chunk(
        &self,
        table: &str,
        chunk: &[Document],
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Uuid>, SyncError> {
        let first = &chunk[0].content;
        let texts: Vec<&str> = chunk.iter().map(|d| d.content.as_str()).collect();
        let vectors = embeddings
            .embed_documents(&texts)
            .await
            .map_err(|e| SyncError::Embedding {
                content: first.clone(),
                reason: e.to_string(),
            })?;
        if vectors.len() != chunk.len() {
            return Err(SyncError::Embedding {
                content: first.clone(),
                reason: format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                ),
            });
        }

        let insert_sql = format!(
            r#"INSERT INTO {table} (id, version, "pageContent", metadata, embedding)
               VALUES ($1, $2, $3, $4, $5)"#
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Storage(format!("failed to begin transaction: {e}")))?;

        let mut ids = Vec::with_capacity(chunk.len());
        for (doc, vec) in chunk.iter().zip(vectors) {
            let id = Uuid::new_v4();
            let metadata = metadata_to_json(&doc.metadata);
            sqlx::query(&insert_sql)
                .bind(id)
                .bind(&self.config.version)
                .bind(&doc.content)
                .bind(&metadata)
                .bind(Vector::from(vec))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    SyncError::Storage(format!("error inserting {:?}: {e}", doc.content))
                })?;
            ids.push(id);
        }

        tx.commit().await.map_err(|e| {
            SyncError::Storage(format!("error committing chunk starting with {first:?}: {e}"))
        })?;
        Ok(ids)
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    fn index_type(&self) -> &'static str {
        "pgvector"
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    /// Ensure the pgvector extension, the backing table and the metadata
    /// index exist.
    ///
    /// This is idempotent and safe to call on every application startup,
    /// including from several processes at once.
    async fn ensure_index(&self) -> Result<(), SyncError> {
        let table = self.table()?;
        let key_field = &self.config.key_field;
        validate_column_name(key_field)?;
        let prefix = table.replace('.', "_");

        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    version TEXT,
                    "pageContent" TEXT,
                    metadata JSONB NOT NULL DEFAULT '{{}}',
                    embedding vector({dims})
                )"#,
                dims = self.config.vector_dimensions,
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {prefix}_metadata_idx ON {table} USING GIN (metadata jsonb_path_ops)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {prefix}_{key_field}_key_idx ON {table} ((metadata ->> '{key_field}'))"
            ),
        ];

        for sql in &statements {
            match sqlx::query(sql).execute(&self.pool).await {
                Ok(_) => {}
                Err(e) if is_already_exists(&e) => {
                    tracing::debug!(target: "vecsync::index", table, "schema object already exists");
                }
                Err(e) => {
                    return Err(SyncError::Storage(format!("failed to ensure index: {e}")));
                }
            }
        }

        Ok(())
    }

    async fn insert_batch(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Uuid>, SyncError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table()?;

        let mut ids = Vec::with_capacity(docs.len());
        for chunk in docs.chunks(self.config.chunk_size.max(1)) {
            let chunk_ids = self.insert_chunk(table, chunk, embeddings).await?;
            tracing::debug!(target: "vecsync::index", table, rows = chunk_ids.len(), "chunk committed");
            ids.extend(chunk_ids);
        }

        Ok(ids)
    }

    async fn find_by_metadata(
        &self,
        filters: &[MetadataFilter],
    ) -> Result<Vec<IndexedDocument>, SyncError> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table()?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"SELECT id, version, "pageContent", metadata FROM {table} WHERE "#
        ));
        push_containment_any(&mut qb, filters)?;

        let rows: Vec<(Uuid, Option<String>, Option<String>, Value)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("find failed: {e}")))?;

        // Rows with NULL content are still returned so callers can delete them.
        Ok(rows
            .into_iter()
            .map(|(id, version, content, metadata)| IndexedDocument {
                id,
                version: version.unwrap_or_default(),
                content: content.unwrap_or_default(),
                metadata: metadata_from_json(metadata),
            })
            .collect())
    }

    async fn find_by_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<IndexedDocument>, SyncError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table()?;
        validate_column_name(key_name)?;

        // The key name is inlined so the `metadata ->> 'key'` index applies.
        let sql = format!(
            r#"SELECT id, version, "pageContent", metadata FROM {table}
               WHERE metadata ->> '{key_name}' = ANY($1::text[])"#
        );
        let key_strings: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();

        let rows: Vec<(Uuid, Option<String>, Option<String>, Value)> = sqlx::query_as(&sql)
            .bind(&key_strings)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("key lookup failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, version, content, metadata)| IndexedDocument {
                id,
                version: version.unwrap_or_default(),
                content: content.unwrap_or_default(),
                metadata: metadata_from_json(metadata),
            })
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        let table = self.table()?;

        let sql = format!("DELETE FROM {table} WHERE id = ANY($1)");
        sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("delete failed: {e}")))?;

        Ok(())
    }

    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedDocument, f32)>, SyncError> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let table = self.table()?;

        let mut qb = QueryBuilder::<Postgres>::new(
            r#"SELECT id, version, "pageContent", metadata, (embedding <=> "#,
        );
        qb.push_bind(Vector::from(embedding.to_vec()));
        qb.push(format!(
            r#") AS distance FROM {table} WHERE embedding IS NOT NULL AND "pageContent" IS NOT NULL"#
        ));
        if let Some(filter) = filter {
            qb.push(" AND ");
            push_containment(&mut qb, filter);
        }
        qb.push(" ORDER BY distance ASC LIMIT ");
        qb.push_bind(i64::try_from(k).unwrap_or(i64::MAX));

        let rows: Vec<(Uuid, Option<String>, Option<String>, Value, Option<f64>)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("similarity search failed: {e}")))?;

        let results = rows
            .into_iter()
            .filter_map(|(id, version, content, metadata, distance)| {
                let distance = distance.filter(|d| d.is_finite())?;
                let content = content?;
                Some((
                    IndexedDocument {
                        id,
                        version: version.unwrap_or_default(),
                        content,
                        metadata: metadata_from_json(metadata),
                    },
                    distance as f32,
                ))
            })
            .collect();

        Ok(results)
    }

    async fn missing_keys(
        &self,
        key_name: &str,
        keys: &[LogicalKey],
    ) -> Result<Vec<LogicalKey>, SyncError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table()?;

        let sql = format!(
            r#"SELECT k FROM UNNEST($1::text[]) WITH ORDINALITY AS u(k, ord)
               WHERE NOT EXISTS (SELECT 1 FROM {table} t WHERE t.metadata ->> $2 = u.k)
               ORDER BY ord"#
        );
        let key_strings: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();

        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(&key_strings)
            .bind(key_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("missing key lookup failed: {e}")))?;

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|(k,)| seen.insert(k.clone()))
            .map(|(k,)| LogicalKey::new(k))
            .collect())
    }

    async fn count(&self) -> Result<usize, SyncError> {
        let table = self.table()?;
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(format!("count failed: {e}")))?;
        Ok(count.max(0) as usize)
    }
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| ALREADY_EXISTS_CODES.iter().any(|c| code == *c))
}

fn metadata_to_json(metadata: &Metadata) -> Value {
    Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn metadata_from_json(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Metadata::new(),
    }
}
