//! Activity executor.
//!
//! Turns one activity into an [`IndexBatch`] and hands it to the engine.
//! Failures are logged and reported as [`ActivityOutcome::Failed`]; an
//! activity always finishes so nothing waiting on it stays blocked.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use index_types::{
    Activity, ActivityType, DocumentUpdate, IndexBatch, IndexDocument, IndexTerm, VersioningInfo,
};

use crate::engine::IndexingEngine;
use crate::error::QueueError;
use crate::signal::ActivityOutcome;
use crate::source::DocumentSource;
use crate::store::ActivityStore;

pub struct Executor {
    engine: Arc<dyn IndexingEngine>,
    store: Arc<dyn ActivityStore>,
    documents: Arc<dyn DocumentSource>,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn IndexingEngine>,
        store: Arc<dyn ActivityStore>,
        documents: Arc<dyn DocumentSource>,
    ) -> Self {
        Self {
            engine,
            store,
            documents,
        }
    }

    /// Run one activity. Never fails; errors become the outcome.
    pub async fn execute(&self, activity: &Activity) -> ActivityOutcome {
        match self.run(activity).await {
            Ok(operations) => {
                debug!(
                    activity_id = activity.id,
                    activity_type = %activity.activity_type,
                    operations,
                    "Executed indexing activity"
                );
                ActivityOutcome::Executed
            }
            Err(e) => {
                warn!(
                    activity_id = activity.id,
                    activity_type = %activity.activity_type,
                    error = %e,
                    "Indexing activity failed"
                );
                ActivityOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(&self, activity: &Activity) -> Result<usize, QueueError> {
        let batch = self.build_batch(activity).await?;
        let operations = batch.len();
        if !batch.is_empty() {
            self.engine.write_index(batch).await?;
        }
        Ok(operations)
    }

    /// Index mutations for one activity.
    pub async fn build_batch(&self, activity: &Activity) -> Result<IndexBatch, QueueError> {
        let mut batch = IndexBatch::default();
        let versioning = &activity.versioning;

        match activity.activity_type {
            ActivityType::AddDocument | ActivityType::UpdateDocument => {
                self.add_versioning(&mut batch, versioning).await?;
                match self.resolve_document(activity).await? {
                    Some(document) => batch.updates.push(DocumentUpdate {
                        term: IndexTerm::VersionId(activity.version_id),
                        document: apply_flags(document, versioning),
                    }),
                    // No longer indexable: drop whatever the version had
                    None if activity.activity_type == ActivityType::UpdateDocument => {
                        batch.deletions.push(IndexTerm::VersionId(activity.version_id))
                    }
                    None => {}
                }
            }
            ActivityType::RemoveTree => {
                batch.deletions.push(IndexTerm::InTree(activity.path.clone()));
            }
            ActivityType::AddTree => {
                batch.deletions.push(IndexTerm::InTree(activity.path.clone()));
                batch.additions = self.documents.load_tree_documents(&activity.path).await?;
            }
            ActivityType::Rebuild => {
                batch.deletions.push(IndexTerm::NodeId(activity.node_id));
                let deleted: BTreeSet<u64> = versioning.delete.iter().copied().collect();
                let mut versions: BTreeSet<u64> = versioning.reindex.iter().copied().collect();
                versions.insert(activity.version_id);

                for version_id in versions.into_iter().filter(|v| !deleted.contains(v)) {
                    let document = if version_id == activity.version_id {
                        self.resolve_document(activity).await?
                    } else {
                        self.documents.load_document(version_id).await?
                    };
                    if let Some(document) = document {
                        batch.additions.push(apply_flags(document, versioning));
                    }
                }
            }
            ActivityType::Restore => match self.resolve_document(activity).await? {
                Some(document) => batch.updates.push(DocumentUpdate {
                    term: IndexTerm::VersionId(activity.version_id),
                    document: apply_flags(document, versioning),
                }),
                None => batch
                    .deletions
                    .push(IndexTerm::VersionId(activity.version_id)),
            },
        }

        Ok(batch)
    }

    async fn add_versioning(
        &self,
        batch: &mut IndexBatch,
        versioning: &VersioningInfo,
    ) -> Result<(), QueueError> {
        batch
            .deletions
            .extend(versioning.delete.iter().map(|v| IndexTerm::VersionId(*v)));

        for version_id in &versioning.reindex {
            if let Some(document) = self.documents.load_document(*version_id).await? {
                batch.updates.push(DocumentUpdate {
                    term: IndexTerm::VersionId(*version_id),
                    document: apply_flags(document, versioning),
                });
            }
        }
        Ok(())
    }

    /// The activity's own document: its payload, else the stored payload,
    /// else a fresh one from the document source.
    async fn resolve_document(&self, activity: &Activity) -> Result<Option<IndexDocument>, QueueError> {
        if let Some(document) = &activity.document {
            return Ok(Some(document.clone()));
        }

        let stored = self.store.load_activities_by_ids(&[activity.id]).await?;
        if let Some(document) = stored.into_iter().find_map(|a| a.document) {
            debug!(activity_id = activity.id, "Reloaded document payload from store");
            return Ok(Some(document));
        }

        self.documents.load_document(activity.version_id).await
    }
}

/// Execute on a separate task so a panic inside the executor becomes a
/// failed outcome instead of a lost completion.
pub async fn execute_isolated(executor: Arc<Executor>, activity: Activity) -> ActivityOutcome {
    let id = activity.id;
    let activity_type = activity.activity_type;
    match tokio::spawn(async move { executor.execute(&activity).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(
                activity_id = id,
                activity_type = %activity_type,
                error = %e,
                "Indexing activity aborted"
            );
            ActivityOutcome::Failed(e.to_string())
        }
    }
}

/// Recompute last-public/last-draft flags when the write moved those pointers.
fn apply_flags(mut document: IndexDocument, versioning: &VersioningInfo) -> IndexDocument {
    if let Some(public) = versioning.last_public_version_id {
        document.is_last_public = document.version_id == public;
    }
    if let Some(draft) = versioning.last_draft_version_id {
        document.is_last_draft = document.version_id == draft;
    }
    document
}
