//! Mapping from index documents and terms to Tantivy.

use tantivy::{TantivyDocument, Term};

use index_types::{IndexDocument, IndexTerm};

use crate::schema::ContentSchema;

/// Normalized subtree key: lowercased, no trailing slash, "/" for the root.
pub fn tree_term_text(path: &str) -> String {
    let trimmed = path.trim_end_matches('/').to_lowercase();
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed
    }
}

/// "/" plus every prefix of `path` that ends before a separator, plus `path`.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let normalized = tree_term_text(path);
    let mut result = vec!["/".to_string()];
    for (i, c) in normalized.char_indices().skip(1) {
        if c == '/' {
            result.push(normalized[..i].to_string());
        }
    }
    if normalized != "/" {
        result.push(normalized);
    }
    result
}

/// Convert an IndexDocument to a Tantivy document.
pub fn index_document_to_doc(schema: &ContentSchema, document: &IndexDocument) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    doc.add_u64(schema.version_id, document.version_id);
    doc.add_u64(schema.node_id, document.node_id);
    doc.add_text(schema.path, tree_term_text(&document.path));
    for ancestor in ancestor_paths(&document.path) {
        doc.add_text(schema.in_tree, ancestor);
    }
    doc.add_u64(schema.is_last_public, u64::from(document.is_last_public));
    doc.add_u64(schema.is_last_draft, u64::from(document.is_last_draft));
    doc.add_text(schema.text, document.text());
    let fields = serde_json::to_string(&document.fields).unwrap_or_default();
    doc.add_text(schema.fields, fields);
    doc
}

/// Convert a queue term to a Tantivy term.
pub fn index_term_to_term(schema: &ContentSchema, term: &IndexTerm) -> Term {
    match term {
        IndexTerm::VersionId(id) => Term::from_field_u64(schema.version_id, *id),
        IndexTerm::NodeId(id) => Term::from_field_u64(schema.node_id, *id),
        IndexTerm::InTree(path) => Term::from_field_text(schema.in_tree, &tree_term_text(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_content_schema;
    use tantivy::schema::Value;

    #[test]
    fn test_tree_term_text() {
        assert_eq!(tree_term_text("/Root/A/"), "/root/a");
        assert_eq!(tree_term_text("/"), "/");
        assert_eq!(tree_term_text(""), "/");
    }

    #[test]
    fn test_ancestor_paths() {
        assert_eq!(ancestor_paths("/Root/A/b"), vec!["/", "/root", "/root/a", "/root/a/b"]);
        assert_eq!(ancestor_paths("/"), vec!["/"]);
    }

    #[test]
    fn test_document_mapping() {
        let schema = build_content_schema();
        let document = IndexDocument::new(3, 7, "/Root/Doc")
            .with_field("Name", "Doc")
            .with_flags(true, false);
        let doc = index_document_to_doc(&schema, &document);

        assert_eq!(
            doc.get_first(schema.version_id).and_then(|v| v.as_u64()),
            Some(7)
        );
        assert_eq!(
            doc.get_first(schema.path).and_then(|v| v.as_str()),
            Some("/root/doc")
        );
        assert_eq!(
            doc.get_first(schema.is_last_public).and_then(|v| v.as_u64()),
            Some(1)
        );
        assert_eq!(doc.get_all(schema.in_tree).count(), 3);
    }
}
