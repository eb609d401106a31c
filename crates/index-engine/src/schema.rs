//! Tantivy schema for content documents.
//!
//! One document per indexed content version.

use tantivy::schema::{Field, Schema, INDEXED, STORED, STRING, TEXT};

use crate::EngineError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct ContentSchema {
    schema: Schema,
    /// Version id, the document key (INDEXED | STORED)
    pub version_id: Field,
    /// Node id (INDEXED | STORED)
    pub node_id: Field,
    /// Lowercased content path (STRING | STORED)
    pub path: Field,
    /// Every ancestor path including the path itself (STRING, multi-valued)
    pub in_tree: Field,
    /// 1 when the version is the node's last public version (INDEXED | STORED)
    pub is_last_public: Field,
    /// 1 when the version is the node's last draft (INDEXED | STORED)
    pub is_last_draft: Field,
    /// Searchable text built from all field values (TEXT)
    pub text: Field,
    /// Raw field map as JSON (STORED)
    pub fields: Field,
}

impl ContentSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a ContentSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, EngineError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| EngineError::SchemaMismatch(format!("missing {name} field")))
        };

        Ok(Self {
            version_id: field("version_id")?,
            node_id: field("node_id")?,
            path: field("path")?,
            in_tree: field("in_tree")?,
            is_last_public: field("is_last_public")?,
            is_last_draft: field("is_last_draft")?,
            text: field("text")?,
            fields: field("fields")?,
            schema,
        })
    }
}

/// Build the content schema.
pub fn build_content_schema() -> ContentSchema {
    let mut schema_builder = Schema::builder();

    let version_id = schema_builder.add_u64_field("version_id", INDEXED | STORED);
    let node_id = schema_builder.add_u64_field("node_id", INDEXED | STORED);
    let path = schema_builder.add_text_field("path", STRING | STORED);
    let in_tree = schema_builder.add_text_field("in_tree", STRING);
    let is_last_public = schema_builder.add_u64_field("is_last_public", INDEXED | STORED);
    let is_last_draft = schema_builder.add_u64_field("is_last_draft", INDEXED | STORED);
    let text = schema_builder.add_text_field("text", TEXT);
    let fields = schema_builder.add_text_field("fields", STORED);

    ContentSchema {
        schema: schema_builder.build(),
        version_id,
        node_id,
        path,
        in_tree,
        is_last_public,
        is_last_draft,
        text,
        fields,
    }
}
