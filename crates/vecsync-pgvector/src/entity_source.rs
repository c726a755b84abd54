use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use vecsync_core::{Entity, EntitySource, LogicalKey, SyncError};

use crate::filter::{validate_column_name, validate_table_name};

/// An [`EntitySource`] reading rows of a PostgreSQL table as JSON.
///
/// Rows are fetched with `to_jsonb(t)`, so every column becomes an entity
/// field. Point `table_name` at a view to hydrate relations: a view that
/// aggregates related rows into a `jsonb` column exposes them to content
/// transforms like any other field.
pub struct PgEntitySource {
    pool: PgPool,
    table_name: String,
    primary_key: String,
}

impl PgEntitySource {
    pub fn new(
        pool: PgPool,
        table_name: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let table_name = table_name.into();
        let primary_key = primary_key.into();
        validate_table_name(&table_name)?;
        validate_column_name(&primary_key)?;
        Ok(Self {
            pool,
            table_name,
            primary_key,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl EntitySource for PgEntitySource {
    async fn fetch(&self, key: &LogicalKey) -> Result<Option<Entity>, SyncError> {
        let sql = format!(
            r#"SELECT to_jsonb(t) FROM {table} t WHERE t."{pk}"::text = $1"#,
            table = self.table_name,
            pk = self.primary_key,
        );
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Source(format!("fetch {key} failed: {e}")))?;

        row.map(|(value,)| into_entity(value)).transpose()
    }

    async fn fetch_many(&self, keys: &[LogicalKey]) -> Result<Vec<Entity>, SyncError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT to_jsonb(t) FROM {table} t WHERE t."{pk}"::text = ANY($1)"#,
            table = self.table_name,
            pk = self.primary_key,
        );
        let key_strings: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let rows: Vec<(Value,)> = sqlx::query_as(&sql)
            .bind(&key_strings)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Source(format!("fetch of {} rows failed: {e}", keys.len())))?;

        rows.into_iter().map(|(value,)| into_entity(value)).collect()
    }

    async fn all_keys(&self) -> Result<Vec<LogicalKey>, SyncError> {
        let sql = format!(
            r#"SELECT t."{pk}"::text FROM {table} t"#,
            table = self.table_name,
            pk = self.primary_key,
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Source(format!("key scan failed: {e}")))?;
        Ok(rows.into_iter().map(|(k,)| LogicalKey::new(k)).collect())
    }
}

fn into_entity(value: Value) -> Result<Entity, SyncError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Source(format!(
            "expected a JSON object row, got {other}"
        ))),
    }
}
