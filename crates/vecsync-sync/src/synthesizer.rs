use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use vecsync_core::{Document, Entity, Metadata, DEFAULT_DOCUMENT_PRIMARY_KEY};

/// Turns a field value into a content fragment; `None` contributes nothing.
pub type ContentTransform = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Turns a field value into a metadata value.
pub type MetadataTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A field contributing to the synthesized page content.
#[derive(Clone)]
pub struct ContentField {
    pub name: String,
    transform: Option<ContentTransform>,
}

impl ContentField {
    /// A field rendered with [`default_content_transform`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: None,
        }
    }

    pub fn with_transform(
        name: impl Into<String>,
        transform: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            transform: Some(Arc::new(transform)),
        }
    }

    fn render(&self, value: &Value) -> Option<String> {
        match &self.transform {
            Some(transform) => transform(value),
            None => default_content_transform(value),
        }
    }
}

impl fmt::Debug for ContentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentField")
            .field("name", &self.name)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A field copied into the document metadata.
#[derive(Clone)]
pub struct MetadataField {
    pub name: String,
    transform: Option<MetadataTransform>,
}

impl MetadataField {
    /// A field whose raw value passes through unchanged.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: None,
        }
    }

    pub fn with_transform(
        name: impl Into<String>,
        transform: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            transform: Some(Arc::new(transform)),
        }
    }

    fn render(&self, value: &Value) -> Value {
        match &self.transform {
            Some(transform) => transform(value),
            None => value.clone(),
        }
    }
}

impl fmt::Debug for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataField")
            .field("name", &self.name)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Default rendering of a content field.
///
/// Null and empty strings are omitted, objects and arrays become canonical
/// JSON (keys sorted), other scalars are converted to their plain text.
pub fn default_content_transform(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) | Value::Array(_) => Some(canonicalize(value).to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
    }
}

/// Rebuild objects with their keys in sorted order, whatever map ordering
/// `serde_json` was compiled with.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Builds documents from entity rows.
///
/// Content fragments are joined with a single space in field declaration
/// order. The order is significant: stored content is compared byte for byte,
/// so reordering fields re-embeds every row on its next change.
#[derive(Debug, Clone)]
pub struct DocumentSynthesizer {
    content_fields: Vec<ContentField>,
    metadata_fields: Vec<MetadataField>,
    entity_key_field: String,
    document_primary_key: String,
}

impl DocumentSynthesizer {
    pub fn new(content_fields: Vec<ContentField>, metadata_fields: Vec<MetadataField>) -> Self {
        Self {
            content_fields,
            metadata_fields,
            entity_key_field: "id".to_string(),
            document_primary_key: DEFAULT_DOCUMENT_PRIMARY_KEY.to_string(),
        }
    }

    /// Entity field holding the row's primary key (default `id`).
    pub fn with_entity_key_field(mut self, field: impl Into<String>) -> Self {
        self.entity_key_field = field.into();
        self
    }

    /// Metadata field the primary key is written to (default `id`).
    pub fn with_document_primary_key(mut self, key: impl Into<String>) -> Self {
        self.document_primary_key = key.into();
        self
    }

    pub fn entity_key_field(&self) -> &str {
        &self.entity_key_field
    }

    pub fn document_primary_key(&self) -> &str {
        &self.document_primary_key
    }

    pub fn content_fields(&self) -> &[ContentField] {
        &self.content_fields
    }

    pub fn metadata_fields(&self) -> &[MetadataField] {
        &self.metadata_fields
    }

    /// Names of every tracked column, content first.
    pub fn tracked_columns(&self) -> impl Iterator<Item = &str> {
        self.content_fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.metadata_fields.iter().map(|f| f.name.as_str()))
    }

    /// Whether any of `changed` is a content or metadata field.
    pub fn tracks_any(&self, changed: &HashSet<String>) -> bool {
        self.tracked_columns().any(|c| changed.contains(c))
    }

    /// Whether the entity carries a non-null value for any content field.
    pub fn has_content(&self, entity: &Entity) -> bool {
        self.content_fields
            .iter()
            .any(|f| entity.get(&f.name).is_some_and(|v| !v.is_null()))
    }

    /// Build the candidate document for `entity`. Pure and infallible:
    /// fields absent from the entity contribute nothing, null ones are kept
    /// as null metadata.
    pub fn synthesize(&self, entity: &Entity) -> Document {
        let content = self
            .content_fields
            .iter()
            .filter_map(|field| field.render(entity.get(&field.name).unwrap_or(&Value::Null)))
            .filter(|fragment| !fragment.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let mut metadata = Metadata::new();
        for field in &self.metadata_fields {
            let Some(raw) = entity.get(&field.name) else {
                continue;
            };
            // Nulls are kept so a column cleared to NULL still drifts.
            metadata.insert(field.name.clone(), field.render(raw));
        }
        metadata.insert(
            self.document_primary_key.clone(),
            entity
                .get(&self.entity_key_field)
                .cloned()
                .unwrap_or(Value::Null),
        );

        Document { content, metadata }
    }
}
