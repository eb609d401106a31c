//! Command implementations for the index admin tool.
//!
//! Every command opens the configured activity store and content index,
//! wires them into a queue, does its work and shuts the queue down so the
//! final completion state is committed.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use index_engine::{ContentIndex, ContentIndexConfig};
use index_queue::{
    ActivityStore, CentralizedIndexingQueue, InMemoryDocumentSource, IndexingEngine,
    IndexingQueue, TantivyEngine,
};
use index_store::ActivityDb;
use index_types::{AdminSettings, CompletionState};

use crate::cli::{Cli, Commands};

/// Load settings and apply CLI overrides.
pub fn load_settings(cli: &Cli) -> Result<AdminSettings> {
    let mut settings =
        AdminSettings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    if let Some(path) = &cli.db_path {
        settings.db_path = path.clone();
    }
    if let Some(path) = &cli.index_path {
        settings.index_path = path.clone();
    }
    if cli.centralized {
        settings.centralized = true;
    }
    Ok(settings)
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

pub async fn run_command(settings: &AdminSettings, command: Commands) -> Result<()> {
    let backends = Backends::open(settings)?;
    match command {
        Commands::State => show_state(&backends),
        Commands::Restore { last_id, gaps } => {
            restore(settings, &backends, CompletionState::new(last_id, gaps)).await
        }
        Commands::Replay => replay(settings, &backends).await,
        Commands::Rebuild => rebuild(settings, &backends).await,
    }
}

/// Store and index opened from the configured paths.
pub struct Backends {
    pub store: Arc<ActivityDb>,
    pub index: Arc<ContentIndex>,
    pub centralized: bool,
}

impl Backends {
    pub fn open(settings: &AdminSettings) -> Result<Self> {
        let store = ActivityDb::open(Path::new(&settings.db_path))
            .with_context(|| format!("Failed to open activity store at {}", settings.db_path))?;
        let index = ContentIndex::open_or_create(ContentIndexConfig::new(&settings.index_path))
            .with_context(|| format!("Failed to open index at {}", settings.index_path))?;
        Ok(Self {
            store: Arc::new(store),
            index: Arc::new(index),
            centralized: settings.centralized,
        })
    }

    fn engine(&self) -> Arc<TantivyEngine> {
        if self.centralized {
            Arc::new(TantivyEngine::centralized(self.index.clone()))
        } else {
            Arc::new(TantivyEngine::new(self.index.clone()))
        }
    }

    /// Documents travel with their activities; nothing else to load from.
    fn documents(&self) -> Arc<InMemoryDocumentSource> {
        Arc::new(InMemoryDocumentSource::new())
    }

    fn queue(&self, settings: &AdminSettings) -> Result<IndexingQueue> {
        IndexingQueue::new(
            self.store.clone(),
            self.engine(),
            self.documents(),
            settings.queue.clone(),
        )
        .context("Failed to create indexing queue")
    }

    fn centralized_queue(&self, settings: &AdminSettings) -> Result<Arc<CentralizedIndexingQueue>> {
        let queue = CentralizedIndexingQueue::new(
            format!("index-admin-{}", std::process::id()),
            self.store.clone(),
            self.engine(),
            self.documents(),
            settings.queue.clone(),
        )
        .context("Failed to create centralized indexing queue")?;
        Ok(Arc::new(queue))
    }
}

fn show_state(backends: &Backends) -> Result<()> {
    let state = backends
        .index
        .completion_state()
        .context("Failed to read completion state")?;
    let stats = backends.store.stats().context("Failed to read store stats")?;

    println!("Index");
    match state {
        Some(state) => {
            println!("  Completion state: {}", state);
            println!("  Last activity:    {}", state.last_activity_id);
            println!("  Gaps:             {}", state.gaps.len());
        }
        None => println!("  Completion state: (none committed)"),
    }
    println!("  Documents:        {}", backends.index.document_count());
    println!();
    println!("Activity store");
    println!("  Last id:          {}", stats.last_id);
    println!("  Activities:       {}", stats.activity_count);
    println!("  Waiting:          {}", stats.waiting_count);
    println!("  Running:          {}", stats.running_count);
    println!("  Done:             {}", stats.done_count);
    Ok(())
}

async fn restore(settings: &AdminSettings, backends: &Backends, state: CompletionState) -> Result<()> {
    info!(state = %state, "Restoring completion state");

    if backends.centralized {
        let reset = ActivityStore::restore_running_state(backends.store.as_ref(), &state)
            .await
            .context("Failed to reset running states")?;
        println!("Reset {} activities to waiting", reset);
        return run_centralized(settings, backends).await;
    }

    let queue = backends.queue(settings)?;
    queue.start().await.context("Failed to start indexing queue")?;
    let report = queue
        .restore_completion_state(state)
        .await
        .context("Failed to restore completion state")?;
    print_json("Restore", &report)?;
    finish(queue).await
}

async fn replay(settings: &AdminSettings, backends: &Backends) -> Result<()> {
    if backends.centralized {
        return run_centralized(settings, backends).await;
    }

    let queue = backends.queue(settings)?;
    let startup = queue.start().await.context("Failed to start indexing queue")?;
    print_json("Startup replay", &startup)?;
    let health = queue.health_check().await.context("Health check failed")?;
    print_json("Health check", &health)?;
    finish(queue).await
}

async fn rebuild(settings: &AdminSettings, backends: &Backends) -> Result<()> {
    if backends.centralized {
        let engine = backends.engine();
        engine.clear_index().await.context("Failed to clear index")?;
        let reset =
            ActivityStore::restore_running_state(backends.store.as_ref(), &CompletionState::default())
                .await
                .context("Failed to reset running states")?;
        println!("Reset {} activities to waiting", reset);
        return run_centralized(settings, backends).await;
    }

    let queue = backends.queue(settings)?;
    queue.start().await.context("Failed to start indexing queue")?;
    let report = queue.rebuild_index().await.context("Rebuild failed")?;
    print_json("Rebuild", &report)?;
    finish(queue).await
}

/// Execute every unprocessed activity of the shared index and stop.
async fn run_centralized(settings: &AdminSettings, backends: &Backends) -> Result<()> {
    let queue = backends.centralized_queue(settings)?;
    let executed = queue
        .start()
        .await
        .context("Failed to start centralized indexing queue")?;
    println!("Executed {} unprocessed activities", executed);
    let stats = queue.stats()?;
    queue.shutdown().await.context("Shutdown failed")?;
    print_json("Queue stats", &stats)
}

async fn finish(queue: IndexingQueue) -> Result<()> {
    let stats = queue.stats()?;
    queue.shutdown().await.context("Shutdown failed")?;
    print_json("Queue stats", &stats)
}

fn print_json<T: serde::Serialize>(title: &str, value: &T) -> Result<()> {
    println!("{}:", title);
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use index_types::{Activity, IndexDocument, IndexTerm};
    use tempfile::TempDir;

    fn settings(dir: &TempDir, centralized: bool) -> AdminSettings {
        let mut settings = AdminSettings::default();
        settings.db_path = dir.path().join("db").to_string_lossy().to_string();
        settings.index_path = dir.path().join("index").to_string_lossy().to_string();
        settings.centralized = centralized;
        settings
    }

    fn seed(backends: &Backends, count: u64) {
        for node in 1..=count {
            let path = format!("/Root/N{node}");
            let activity = Activity::add_document(node, node, &path)
                .with_document(IndexDocument::new(node, node, &path));
            backends.store.register(&activity).unwrap();
        }
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "index-admin",
            "state",
            "--db-path",
            "/tmp/x-db",
            "--index-path",
            "/tmp/x-index",
            "--centralized",
        ]);
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.db_path, "/tmp/x-db");
        assert_eq!(settings.index_path, "/tmp/x-index");
        assert!(settings.centralized);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replay_indexes_stored_activities() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, false);
        let backends = Backends::open(&settings).unwrap();
        seed(&backends, 3);

        replay(&settings, &backends).await.unwrap();

        let state = backends.index.completion_state().unwrap().unwrap();
        assert_eq!(state, CompletionState::new(3, vec![]));
        assert_eq!(backends.index.count(&IndexTerm::VersionId(2)).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_centralized_rebuild() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir, true);
        let backends = Backends::open(&settings).unwrap();
        seed(&backends, 2);

        rebuild(&settings, &backends).await.unwrap();
        assert_eq!(backends.index.document_count(), 2);
        assert_eq!(backends.store.stats().unwrap().done_count, 2);
    }
}
