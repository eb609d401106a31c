//! Tantivy content index.
//!
//! Handles index creation, writes, commits and the completion state that
//! rides along with every commit as the commit payload.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, info, warn};

use index_types::{CompletionState, IndexBatch, IndexTerm};

use crate::document::{index_document_to_doc, index_term_to_term};
use crate::error::EngineError;
use crate::schema::{build_content_schema, ContentSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Content index configuration
#[derive(Debug, Clone)]
pub struct ContentIndexConfig {
    /// Path to index directory
    pub index_path: PathBuf,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for ContentIndexConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./content-index"),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl ContentIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Content index with a single shared writer.
///
/// Writes are not visible to [`count`](Self::count) and friends until
/// [`commit`](Self::commit) is called.
pub struct ContentIndex {
    index: Index,
    schema: ContentSchema,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    /// Payload attached to the next commit. Starts as the last committed one.
    payload: Mutex<Option<String>>,
}

impl ContentIndex {
    /// Open existing index or create new one.
    pub fn open_or_create(config: ContentIndexConfig) -> Result<Self, EngineError> {
        let index = open_or_create_index(&config.index_path)?;
        let content_index = Self::from_index(index, config.writer_memory_mb)?;
        info!(path = ?config.index_path, "Opened content index");
        Ok(content_index)
    }

    /// Create a RAM-backed index (nothing survives drop).
    pub fn in_memory() -> Result<Self, EngineError> {
        let schema = build_content_schema();
        let index = Index::create_in_ram(schema.schema().clone());
        Self::from_index(index, DEFAULT_WRITER_MEMORY_MB)
    }

    fn from_index(index: Index, writer_memory_mb: usize) -> Result<Self, EngineError> {
        let schema = ContentSchema::from_schema(index.schema())?;
        let writer = index.writer(writer_memory_mb * 1024 * 1024)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let payload = index.load_metas()?.payload;
        debug!(memory_mb = writer_memory_mb, has_payload = payload.is_some(), "Created index writer");

        Ok(Self {
            index,
            schema,
            writer: Mutex::new(writer),
            reader,
            payload: Mutex::new(payload),
        })
    }

    /// Get the content schema
    pub fn schema(&self) -> &ContentSchema {
        &self.schema
    }

    /// Apply one batch: deletions, then updates, then additions.
    pub fn write(&self, batch: &IndexBatch) -> Result<(), EngineError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?;

        for term in &batch.deletions {
            writer.delete_term(index_term_to_term(&self.schema, term));
        }
        for update in &batch.updates {
            writer.delete_term(index_term_to_term(&self.schema, &update.term));
            writer.add_document(index_document_to_doc(&self.schema, &update.document))?;
        }
        for document in &batch.additions {
            writer.add_document(index_document_to_doc(&self.schema, document))?;
        }

        debug!(
            deletions = batch.deletions.len(),
            updates = batch.updates.len(),
            additions = batch.additions.len(),
            "Applied index batch"
        );
        Ok(())
    }

    /// Remember the completion state to store with the next commit.
    pub fn set_completion_state(&self, state: &CompletionState) -> Result<(), EngineError> {
        let json = serde_json::to_string(state)?;
        let mut payload = self
            .payload
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?;
        *payload = Some(json);
        Ok(())
    }

    /// Completion state stored with the last commit, if any.
    pub fn completion_state(&self) -> Result<Option<CompletionState>, EngineError> {
        let metas = self.index.load_metas()?;
        match metas.payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Commit pending changes and make them visible.
    ///
    /// The current payload is written on every commit; a commit without one
    /// would drop the previous state.
    pub fn commit(&self) -> Result<u64, EngineError> {
        let payload = self
            .payload
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?
            .clone();
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?;

        let mut prepared = writer.prepare_commit()?;
        if let Some(payload) = &payload {
            prepared.set_payload(payload);
        }
        let opstamp = prepared.commit()?;
        drop(writer);

        self.reader.reload()?;
        info!(opstamp, "Committed index changes");
        Ok(opstamp)
    }

    /// Rollback uncommitted changes.
    pub fn rollback(&self) -> Result<u64, EngineError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?;

        let opstamp = writer.rollback()?;
        warn!(opstamp, "Rolled back index changes");
        Ok(opstamp)
    }

    /// Delete every document. Takes effect on the next commit.
    pub fn clear(&self) -> Result<(), EngineError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| EngineError::IndexLocked(e.to_string()))?;
        writer.delete_all_documents()?;
        info!("Cleared content index");
        Ok(())
    }

    /// Number of committed documents.
    pub fn document_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Number of committed documents matching `term`.
    pub fn count(&self, term: &IndexTerm) -> Result<usize, EngineError> {
        let query = TermQuery::new(index_term_to_term(&self.schema, term), IndexRecordOption::Basic);
        let count = self.reader.searcher().search(&query, &Count)?;
        Ok(count)
    }

    /// Version ids of committed documents matching `term`, ascending.
    pub fn version_ids(&self, term: &IndexTerm) -> Result<Vec<u64>, EngineError> {
        let searcher = self.reader.searcher();
        let limit = (searcher.num_docs() as usize).max(1);
        let query = TermQuery::new(index_term_to_term(&self.schema, term), IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id) = doc.get_first(self.schema.version_id).and_then(|v| v.as_u64()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Whether the stored document of `version_id` carries the given flags.
    pub fn version_flags(&self, version_id: u64) -> Result<Option<(bool, bool)>, EngineError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            index_term_to_term(&self.schema, &IndexTerm::VersionId(version_id)),
            IndexRecordOption::Basic,
        );
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_score, doc_address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(doc_address)?;
        let flag = |field: Field| doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0) == 1;
        Ok(Some((flag(self.schema.is_last_public), flag(self.schema.is_last_draft))))
    }
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
pub fn open_or_create_index(path: &Path) -> Result<Index, EngineError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        let index = Index::open_in_dir(path)?;
        Ok(index)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_content_schema();
        let index = Index::create_in_dir(path, schema.schema().clone())?;
        Ok(index)
    }
}
