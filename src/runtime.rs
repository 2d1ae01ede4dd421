//! Server runtime lifecycle.
//!
//! Boots components in dependency order, acquires the instance lock, and
//! runs either the full writer task set or a read-only lock-watch loop
//! that promotes to writer when the current holder goes stale. Shutdown
//! cancels tasks, releases the lock, and closes stores in reverse order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::{IndexError, IndexResult};
use crate::extractors::ExtractorRegistry;
use crate::indexing::{FileIndexingPipeline, IndexingService, ReferenceResolver};
use crate::lock::InstanceLock;
use crate::model::RepositoryStatus;
use crate::storage::{RelationGraph, StateDb, VectorStore};
use crate::watcher::{FileEventRouter, FileWatcher};

const LOCK_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of reconciling configured repositories with stored rows.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Shared handles for every service the runtime owns.
pub struct ServerContext {
    pub settings: Settings,
    pub state: StateDb,
    pub graph: RelationGraph,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub indexer: Arc<IndexingService>,
    pub resolver: Arc<ReferenceResolver>,
    pub watcher: Arc<FileWatcher>,
    pub router: Arc<FileEventRouter>,
    is_writer: AtomicBool,
}

impl ServerContext {
    pub fn is_writer(&self) -> bool {
        self.is_writer.load(Ordering::Relaxed)
    }
}

pub struct ServerRuntime {
    context: Option<Arc<ServerContext>>,
    lock: Option<Arc<Mutex<InstanceLock>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for ServerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerRuntime {
    pub fn new() -> Self {
        Self {
            context: None,
            lock: None,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> IndexResult<Arc<ServerContext>> {
        self.context
            .clone()
            .ok_or_else(|| IndexError::General("server runtime not started".to_string()))
    }

    /// Start the runtime: initialize stores, attempt the writer lock, and
    /// launch the mode-appropriate background tasks.
    pub async fn start(&mut self, settings: Settings) -> IndexResult<()> {
        if self.context.is_some() {
            return Err(IndexError::General(
                "server runtime already started".to_string(),
            ));
        }

        tracing::info!("mrcis server starting");
        std::fs::create_dir_all(&settings.storage.data_directory).map_err(|e| {
            IndexError::General(format!("cannot create data directory: {e}"))
        })?;

        // Writer lock decides which startup path runs
        let mut lock = InstanceLock::new(&settings.storage.data_directory);
        let is_writer = lock.try_acquire();
        if is_writer {
            tracing::info!("acquired writer lock, starting as writer");
        } else {
            tracing::info!("writer lock held elsewhere, starting read-only");
        }
        let lock = Arc::new(Mutex::new(lock));

        let state = StateDb::open(&settings.state_db_path()).await?;
        if is_writer {
            let recovered = state.recover_from_crash().await?;
            if recovered > 0 {
                tracing::info!(recovered, "recovered files from interrupted indexing");
            }
            let reconciled = reconcile_repositories(&state, &settings).await?;
            tracing::info!(
                added = reconciled.added.len(),
                removed = reconciled.removed.len(),
                unchanged = reconciled.unchanged.len(),
                "config reconciled"
            );
        } else {
            tracing::info!("read-only instance, skipping crash recovery and reconciliation");
        }

        let graph = RelationGraph::new(&state);
        let vectors = Arc::new(VectorStore::open(
            &settings.vectors_path(),
            settings.embedding.dimensions,
        )?);
        let embedder: Arc<dyn Embedder> =
            Arc::new(EmbeddingClient::new(settings.embedding.clone())?);

        let registry = ExtractorRegistry::create_default(&settings.files)?;
        let pipeline = FileIndexingPipeline::new(
            Arc::clone(&vectors),
            graph.clone(),
            registry,
            Arc::clone(&embedder),
        );

        let repo_configs: HashMap<_, _> = settings
            .repositories
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();

        let resolver = Arc::new(ReferenceResolver::new(
            graph.clone(),
            settings.indexing.resolution_interval_seconds,
            settings.indexing.max_retries,
            settings.indexing.batch_size as u32,
        ));

        let mut indexer = IndexingService::new(
            state.clone(),
            graph.clone(),
            Arc::clone(&vectors),
            pipeline,
            repo_configs,
            &settings.indexing,
            settings.files.clone(),
        );
        indexer.set_resolver(Arc::clone(&resolver));
        let indexer = Arc::new(indexer);

        let router = Arc::new(FileEventRouter::new(Arc::clone(&indexer)));
        let watcher = Arc::new(FileWatcher::new(
            settings.repositories.clone(),
            settings.indexing.watch_debounce_ms,
        ));

        let context = Arc::new(ServerContext {
            settings,
            state,
            graph,
            vectors,
            embedder,
            indexer,
            resolver,
            watcher,
            router,
            is_writer: AtomicBool::new(is_writer),
        });

        if is_writer {
            start_writer_tasks(Arc::clone(&context), Arc::clone(&lock), &self.tasks).await?;
        } else {
            let handle = tokio::spawn(lock_watch_loop(
                Arc::clone(&context),
                Arc::clone(&lock),
                Arc::clone(&self.tasks),
            ));
            self.tasks.lock().expect("task list poisoned").push(handle);
        }

        self.context = Some(context);
        self.lock = Some(lock);
        tracing::info!(
            mode = if is_writer { "writer" } else { "read-only" },
            "mrcis server ready"
        );
        Ok(())
    }

    /// Stop the runtime: cooperative shutdown flags, then task
    /// cancellation, lock release, and store close, in reverse order.
    pub async fn stop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        tracing::info!("mrcis server shutting down");

        context.watcher.stop();
        context.resolver.stop();
        context.indexer.stop();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().expect("task list poisoned"));
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(lock) = self.lock.take() {
            lock.lock().expect("lock poisoned").release();
        }

        context.state.close().await;
        tracing::info!("mrcis server shutdown complete");
    }
}

/// Diff configured repositories against state rows. New names get rows;
/// rows no longer configured are paused.
pub async fn reconcile_repositories(
    state: &StateDb,
    settings: &Settings,
) -> IndexResult<ReconcileResult> {
    let mut result = ReconcileResult::default();
    let stored = state.get_all_repositories().await?;

    for configured in &settings.repositories {
        if stored.iter().any(|r| r.name == configured.name) {
            result.unchanged.push(configured.name.clone());
        } else {
            state.create_repository(&configured.name).await?;
            result.added.push(configured.name.clone());
        }
    }
    for repo in &stored {
        if settings.repository(&repo.name).is_none() {
            state
                .update_repository_status(repo.id, RepositoryStatus::Paused, None)
                .await?;
            result.removed.push(repo.name.clone());
        }
    }
    Ok(result)
}

/// Scan configured repositories and launch the writer task set.
async fn start_writer_tasks(
    context: Arc<ServerContext>,
    lock: Arc<Mutex<InstanceLock>>,
    tasks: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> IndexResult<()> {
    // Scan before the loops start so the backlog is queued up front. A
    // failing scan marks the repository, it never takes the process down.
    for repo_config in &context.settings.repositories {
        match context.state.get_repository_by_name(&repo_config.name).await? {
            Some(repo) => match context
                .indexer
                .scan_repository(repo.id, repo_config, false)
                .await
            {
                Ok(queued) => {
                    tracing::info!(repo = %repo_config.name, queued, "startup scan");
                }
                Err(e) => {
                    tracing::error!(repo = %repo_config.name, "startup scan failed: {e}");
                    context
                        .state
                        .update_repository_status(
                            repo.id,
                            RepositoryStatus::Error,
                            Some(&e.to_string()),
                        )
                        .await?;
                }
            },
            None => {
                tracing::warn!(repo = %repo_config.name, "repository missing from state, skipping scan");
            }
        }
    }

    let mut handles = Vec::new();

    handles.push(tokio::spawn(Arc::clone(&context.indexer).process_backlog()));
    handles.push(tokio::spawn(
        Arc::clone(&context.indexer).retry_failed_files(),
    ));
    handles.push(tokio::spawn(Arc::clone(&context.resolver).run_forever()));

    let watcher = Arc::clone(&context.watcher);
    let router = Arc::clone(&context.router);
    handles.push(tokio::spawn(async move {
        if let Err(e) = watcher.watch(router).await {
            tracing::error!("watcher failed: {e}");
        }
    }));

    handles.push(tokio::spawn(heartbeat_loop(lock)));

    tasks.lock().expect("task list poisoned").extend(handles);
    Ok(())
}

/// Refresh the lock timestamp while this process is the writer.
async fn heartbeat_loop(lock: Arc<Mutex<InstanceLock>>) {
    let interval = {
        let lock = lock.lock().expect("lock poisoned");
        Duration::from_secs(lock.heartbeat_seconds())
    };
    loop {
        tokio::time::sleep(interval).await;
        lock.lock().expect("lock poisoned").heartbeat();
    }
}

/// Read-only mode: periodically try to take over a stale writer lock; on
/// success, start the full writer task set.
async fn lock_watch_loop(
    context: Arc<ServerContext>,
    lock: Arc<Mutex<InstanceLock>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        tokio::time::sleep(LOCK_CHECK_INTERVAL).await;

        let promoted = lock.lock().expect("lock poisoned").check_and_promote();
        if promoted {
            tracing::info!("writer lock was stale, promoting to writer");
            context.is_writer.store(true, Ordering::Relaxed);
            if let Err(e) = start_writer_tasks(Arc::clone(&context), lock, &tasks).await {
                tracing::error!("promotion failed: {e}");
            } else {
                tracing::info!("promotion complete, now running as writer");
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_reconcile_adds_pauses_and_keeps() {
        let state = StateDb::in_memory().await.unwrap();
        state.create_repository("kept").await.unwrap();
        let removed_id = state.create_repository("removed").await.unwrap();

        let mut settings = Settings::default();
        settings.repositories = vec![
            RepositoryConfig {
                name: "kept".to_string(),
                path: PathBuf::from("/repos/kept"),
                branch: None,
            },
            RepositoryConfig {
                name: "fresh".to_string(),
                path: PathBuf::from("/repos/fresh"),
                branch: None,
            },
        ];

        let result = reconcile_repositories(&state, &settings).await.unwrap();
        assert_eq!(result.added, vec!["fresh"]);
        assert_eq!(result.removed, vec!["removed"]);
        assert_eq!(result.unchanged, vec!["kept"]);

        assert!(state.get_repository_by_name("fresh").await.unwrap().is_some());
        let paused = state.get_repository(removed_id).await.unwrap().unwrap();
        assert_eq!(paused.status, RepositoryStatus::Paused);
    }
}
