use sqlx::{Postgres, QueryBuilder};
use vecsync_core::{MetadataFilter, SyncError};

/// Push `(metadata @> $n::jsonb) OR (metadata @> $m::jsonb) ...` onto `qb`.
///
/// Every filter becomes its own bound parameter; nothing is interpolated.
/// All filters are validated before anything is pushed, so one malformed
/// filter rejects the whole call instead of being dropped.
pub(crate) fn push_containment_any(
    qb: &mut QueryBuilder<'_, Postgres>,
    filters: &[MetadataFilter],
) -> Result<(), SyncError> {
    if filters.is_empty() {
        return Err(SyncError::MalformedFilter(
            "at least one filter is required".to_string(),
        ));
    }
    for filter in filters {
        filter.validate()?;
    }

    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        push_containment(qb, filter);
    }
    qb.push(")");
    Ok(())
}

/// Push a single `(metadata @> $n::jsonb)` predicate. The filter must already
/// be validated.
pub(crate) fn push_containment(qb: &mut QueryBuilder<'_, Postgres>, filter: &MetadataFilter) {
    qb.push("(metadata @> ");
    qb.push_bind(filter.to_json());
    qb.push("::jsonb)");
}

/// Validate that a table name is safe to interpolate into SQL.
///
/// Allows alphanumeric ASCII characters, underscores, and dots (for
/// schema-qualified names like `public.documents`).
pub(crate) fn validate_table_name(name: &str) -> Result<(), SyncError> {
    if name.is_empty() {
        return Err(SyncError::Config("table name must not be empty".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(SyncError::Config(format!(
            "invalid table name '{name}': only alphanumeric, underscore, and dot characters are allowed",
        )));
    }
    Ok(())
}

/// Validate a bare column name (no schema qualification).
pub(crate) fn validate_column_name(name: &str) -> Result<(), SyncError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SyncError::Config(format!(
            "invalid column name '{name}': only alphanumeric and underscore characters are allowed",
        )));
    }
    Ok(())
}
