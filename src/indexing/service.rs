//! Queue-driven indexing service.
//!
//! Owns the work queue: scans repositories, processes files through the
//! pipeline, retries failures with a bounded budget, and triggers a
//! resolver pass after each indexed file. Exactly one service runs per
//! writer instance; file processing is sequential and shutdown is checked
//! between files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{FilesConfig, IndexingConfig, RepositoryConfig};
use crate::discovery::{PathNormalizer, RepositoryScanner, compute_file_checksum};
use crate::error::{IndexError, IndexResult};
use crate::model::{FileStatus, IndexedFile, RepositoryStatus};
use crate::storage::{RelationGraph, StateDb, VectorStore};

use super::language::LanguageDetector;
use super::pipeline::FileIndexingPipeline;
use super::resolver::ReferenceResolver;

/// Retry policy: failures below the budget stay retryable, at the budget
/// they become permanent.
#[derive(Debug, Clone, Copy)]
struct FailurePolicy {
    max_retries: u32,
}

impl FailurePolicy {
    fn determine(&self, failure_count: u32) -> (bool, FileStatus) {
        if failure_count < self.max_retries {
            (true, FileStatus::Failed)
        } else {
            (false, FileStatus::PermanentFailure)
        }
    }
}

pub struct IndexingService {
    state: StateDb,
    graph: RelationGraph,
    vectors: Arc<VectorStore>,
    pipeline: FileIndexingPipeline,
    repo_configs: HashMap<String, RepositoryConfig>,
    files_config: FilesConfig,
    language_detector: LanguageDetector,
    failure_policy: FailurePolicy,
    retry_interval: Duration,
    resolver: Option<Arc<ReferenceResolver>>,
    shutdown: AtomicBool,
}

impl IndexingService {
    pub fn new(
        state: StateDb,
        graph: RelationGraph,
        vectors: Arc<VectorStore>,
        pipeline: FileIndexingPipeline,
        repo_configs: HashMap<String, RepositoryConfig>,
        indexing: &IndexingConfig,
        files_config: FilesConfig,
    ) -> Self {
        Self {
            state,
            graph,
            vectors,
            pipeline,
            repo_configs,
            files_config,
            language_detector: LanguageDetector::new(),
            failure_policy: FailurePolicy {
                max_retries: indexing.max_retries,
            },
            retry_interval: Duration::from_secs(indexing.retry_delay_seconds),
            resolver: None,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Wire the resolver used for post-index synchronous passes.
    pub fn set_resolver(&mut self, resolver: Arc<ReferenceResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Queue a single file for indexing. Skips unchanged files unless
    /// forced; the file row and queue entry are written in one transaction.
    pub async fn index_file(
        &self,
        file_path: &Path,
        repo_id: Uuid,
        repo_root: Option<&Path>,
        force: bool,
    ) -> IndexResult<Uuid> {
        let checksum = compute_file_checksum(file_path).map_err(|e| IndexError::FileRead {
            path: file_path.to_path_buf(),
            source: e,
        })?;

        let stored_path = match repo_root {
            Some(root) => PathNormalizer::new(root).to_repo_relative(file_path),
            None => file_path.to_string_lossy().into_owned(),
        };

        let existing = self.state.get_file_by_path(repo_id, &stored_path).await?;
        if !force
            && let Some(existing) = &existing
            && existing.checksum == checksum
        {
            tracing::debug!(path = %stored_path, "file unchanged");
            return Ok(existing.id);
        }

        let metadata = std::fs::metadata(file_path).map_err(|e| IndexError::FileRead {
            path: file_path.to_path_buf(),
            source: e,
        })?;
        let file = IndexedFile {
            id: existing.map(|e| e.id).unwrap_or_else(Uuid::new_v4),
            repository_id: repo_id,
            path: stored_path,
            checksum,
            file_size: metadata.len(),
            language: self.language_detector.detect(file_path),
            status: FileStatus::Pending,
            failure_count: 0,
            error_message: None,
            entity_count: 0,
            last_modified_at: metadata
                .modified()
                .map(chrono::DateTime::from)
                .unwrap_or_else(|_| Utc::now()),
            last_indexed_at: None,
        };

        Ok(self.state.upsert_file_and_enqueue(&file).await?)
    }

    /// Walk a repository root and queue new or changed files. Returns how
    /// many files were queued.
    pub async fn scan_repository(
        &self,
        repo_id: Uuid,
        repo_config: &RepositoryConfig,
        force: bool,
    ) -> IndexResult<u64> {
        let scanner = RepositoryScanner::new(&repo_config.path, self.files_config.clone());
        let normalizer = PathNormalizer::new(&repo_config.path);
        let mut queued = 0u64;

        for file_path in scanner.iter_files() {
            if !force {
                let Ok(checksum) = compute_file_checksum(&file_path) else {
                    continue;
                };
                let lookup = normalizer.to_repo_relative(&file_path);
                if let Some(existing) = self.state.get_file_by_path(repo_id, &lookup).await?
                    && existing.checksum == checksum
                {
                    continue;
                }
            }
            self.index_file(&file_path, repo_id, Some(&repo_config.path), force)
                .await?;
            queued += 1;
        }

        if queued > 0 {
            self.state
                .update_repository_status(repo_id, RepositoryStatus::Indexing, None)
                .await?;
        }
        tracing::info!(repo = %repo_config.name, queued, "repository scan complete");
        Ok(queued)
    }

    /// Queue a whole repository for reindexing. `force` clears the existing
    /// index first and resets failure history.
    pub async fn queue_repository(&self, repo_id: Uuid, force: bool) -> IndexResult<u64> {
        let repo = self
            .state
            .get_repository(repo_id)
            .await?
            .ok_or_else(|| IndexError::RepositoryNotFound {
                name: repo_id.to_string(),
            })?;
        let repo_config = self.repo_configs.get(&repo.name).cloned().ok_or_else(|| {
            IndexError::RepositoryNotConfigured {
                name: repo.name.clone(),
            }
        })?;

        if force {
            self.clear_repository_index(repo_id).await?;
        }
        self.scan_repository(repo_id, &repo_config, force).await
    }

    async fn clear_repository_index(&self, repo_id: Uuid) -> IndexResult<()> {
        for file in self.state.list_files_by_repository(repo_id).await? {
            self.graph.delete_entities_for_file(file.id).await?;
            self.vectors.delete_by_file(file.id)?;
        }
        self.state
            .mark_repository_files_pending(repo_id, true)
            .await?;
        self.state.enqueue_pending_files(repo_id).await?;
        tracing::info!(repo = %repo_id, "cleared repository index");
        Ok(())
    }

    // =========================================================================
    // Processing loop
    // =========================================================================

    /// Main processing loop. Dequeues files until shutdown; per-file errors
    /// are recorded on the file row and never escape the loop.
    pub async fn process_backlog(self: Arc<Self>) {
        tracing::info!("indexing backlog processing started");

        while !self.shutdown.load(Ordering::Relaxed) {
            let file = match self.state.dequeue_next_file().await {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("dequeue failed (will retry): {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let Some(file) = file else {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };

            if let Err(e) = self.process_file(&file).await {
                self.handle_failure(&file, &e).await;
            }
        }
    }

    /// Safety-net sweep: re-enqueue files stuck in `failed` that missed
    /// their re-enqueue (e.g. a crash between mark-failed and enqueue).
    pub async fn retry_failed_files(self: Arc<Self>) {
        tracing::info!("failed file retry loop started");

        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(self.retry_interval).await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.state.get_retryable_failed_files().await {
                Ok(files) if !files.is_empty() => {
                    let count = files.len();
                    for file in files {
                        if let Err(e) = self
                            .state
                            .enqueue_file(file.id, file.repository_id, 0)
                            .await
                        {
                            tracing::warn!("failed to re-enqueue {}: {e}", file.id);
                        }
                    }
                    tracing::info!(count, "re-enqueued failed files for retry");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("failed file retry check error: {e}"),
            }
        }
    }

    /// Process one dequeued file end to end.
    pub async fn process_file(&self, file: &IndexedFile) -> IndexResult<()> {
        self.state
            .update_file_status(file.id, FileStatus::Processing)
            .await?;

        let repo = self
            .state
            .get_repository(file.repository_id)
            .await?
            .ok_or_else(|| IndexError::RepositoryNotFound {
                name: file.repository_id.to_string(),
            })?;
        let repo_config = self.repo_configs.get(&repo.name).ok_or_else(|| {
            IndexError::RepositoryNotConfigured {
                name: repo.name.clone(),
            }
        })?;
        let full_path = repo_config.path.join(&file.path);

        if !full_path.exists() {
            self.handle_deleted_file(file).await?;
            return Ok(());
        }

        let language = self.language_detector.detect(&full_path);
        let result = self
            .pipeline
            .process(file, &full_path, language.as_deref())
            .await?;

        self.state
            .update_file_indexed(file.id, result.entity_count)
            .await?;
        self.update_stats_after_indexed(file.repository_id).await?;

        tracing::info!(
            file = %file.path,
            entities = result.entity_count,
            "file indexed"
        );

        // Post-index resolver pass picks up references that now have targets
        if let Some(resolver) = &self.resolver {
            match resolver.resolve_batch().await {
                Ok(resolution) if resolution.resolved > 0 => {
                    tracing::info!(
                        resolved = resolution.resolved,
                        pending = resolution.still_pending,
                        "post-index resolution"
                    );
                    let relation_count = self
                        .graph
                        .count_relations_for_repository(file.repository_id)
                        .await?;
                    self.state
                        .update_repository_stats(
                            file.repository_id,
                            None,
                            None,
                            Some(relation_count),
                            None,
                            None,
                        )
                        .await?;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("post-index resolution failed: {e}"),
            }
        }
        Ok(())
    }

    /// Recompute aggregates from live counts; transition the repository to
    /// watching once its queue drains.
    async fn update_stats_after_indexed(&self, repo_id: Uuid) -> IndexResult<()> {
        let file_count = self
            .state
            .count_files_with_status(repo_id, FileStatus::Indexed)
            .await?;
        let entity_count = self.graph.count_entities_for_repository(repo_id).await?;
        let relation_count = self.graph.count_relations_for_repository(repo_id).await?;

        let drained = self.state.queue_length_for_repository(repo_id).await? == 0;
        let status = drained.then_some(RepositoryStatus::Watching);

        self.state
            .update_repository_stats(
                repo_id,
                Some(file_count),
                Some(entity_count),
                Some(relation_count),
                Some(Utc::now()),
                status,
            )
            .await?;
        Ok(())
    }

    async fn handle_failure(&self, file: &IndexedFile, error: &IndexError) {
        tracing::error!(file = %file.path, "indexing failed: {error}");

        let new_count = file.failure_count + 1;
        let (should_retry, status) = self.failure_policy.determine(new_count);

        if should_retry
            && let Err(e) = self.state.enqueue_file(file.id, file.repository_id, 0).await
        {
            tracing::warn!("failed to re-enqueue {}: {e}", file.id);
        }
        if let Err(e) = self
            .state
            .update_file_failure(file.id, status, new_count, Some(&error.to_string()))
            .await
        {
            tracing::warn!("failed to record failure for {}: {e}", file.id);
        }
    }

    /// Purge a file whose filesystem path no longer exists.
    pub async fn handle_deleted_file(&self, file: &IndexedFile) -> IndexResult<()> {
        tracing::info!(file = %file.path, "file deleted");
        self.vectors.delete_by_file(file.id)?;
        self.graph.delete_entities_for_file(file.id).await?;
        self.state
            .update_file_status(file.id, FileStatus::Deleted)
            .await?;
        Ok(())
    }

    pub fn state(&self) -> &StateDb {
        &self.state
    }

    pub fn repo_config(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repo_configs.get(name)
    }

    pub fn files_config(&self) -> &FilesConfig {
        &self.files_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::embedding::HashingEmbedder;
    use crate::extractors::ExtractorRegistry;
    use tempfile::TempDir;

    async fn build_service(data_dir: &TempDir, repo_root: &Path) -> (Arc<IndexingService>, Uuid) {
        let settings = Settings::default();
        let state = StateDb::in_memory().await.unwrap();
        let graph = RelationGraph::new(&state);
        let vectors = Arc::new(
            VectorStore::open(&data_dir.path().join("vectors.json"), 16).unwrap(),
        );
        let registry = ExtractorRegistry::create_default(&settings.files).unwrap();
        let pipeline = FileIndexingPipeline::new(
            Arc::clone(&vectors),
            graph.clone(),
            registry,
            Arc::new(HashingEmbedder { dims: 16 }),
        );

        let repo_id = state.create_repository("sdk").await.unwrap();
        let mut repo_configs = HashMap::new();
        repo_configs.insert(
            "sdk".to_string(),
            RepositoryConfig {
                name: "sdk".to_string(),
                path: repo_root.to_path_buf(),
                branch: None,
            },
        );

        let mut service = IndexingService::new(
            state,
            graph.clone(),
            vectors,
            pipeline,
            repo_configs,
            &settings.indexing,
            settings.files.clone(),
        );
        service.set_resolver(Arc::new(ReferenceResolver::new(graph, 60, 3, 100)));
        (Arc::new(service), repo_id)
    }

    #[tokio::test]
    async fn test_index_file_skips_unchanged_checksum() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        let file_path = repo_dir.path().join("a.py");
        std::fs::write(&file_path, "def f():\n    pass\n").unwrap();

        let first = service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        assert_eq!(service.state().queue_length().await.unwrap(), 1);

        // Drain the queue entry, then re-index the unchanged file
        service.state().dequeue_next_file().await.unwrap();
        let second = service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(service.state().queue_length().await.unwrap(), 0);

        // Force bypasses the checksum check
        service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), true)
            .await
            .unwrap();
        assert_eq!(service.state().queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_repository_enqueues_then_noop() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        std::fs::write(repo_dir.path().join("a.py"), "def a():\n    pass\n").unwrap();
        std::fs::write(repo_dir.path().join("b.py"), "def b():\n    pass\n").unwrap();

        let config = service.repo_config("sdk").unwrap().clone();
        let queued = service
            .scan_repository(repo_id, &config, false)
            .await
            .unwrap();
        assert_eq!(queued, 2);

        let repo = service
            .state()
            .get_repository(repo_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.status, RepositoryStatus::Indexing);

        // Rescan with no changes queues nothing
        let queued_again = service
            .scan_repository(repo_id, &config, false)
            .await
            .unwrap();
        assert_eq!(queued_again, 0);
    }

    #[tokio::test]
    async fn test_process_file_indexes_and_updates_stats() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        let file_path = repo_dir.path().join("service.py");
        std::fs::write(
            &file_path,
            "class Service:\n    def run(self):\n        self.helper()\n    def helper(self):\n        pass\n",
        )
        .unwrap();

        service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        let file = service.state().dequeue_next_file().await.unwrap().unwrap();
        service.process_file(&file).await.unwrap();

        let stored = service.state().get_file(file.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Indexed);
        assert_eq!(stored.entity_count, 3);

        let repo = service
            .state()
            .get_repository(repo_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.entity_count, 3);
        // Queue drained => watching; post-index resolution bound the call
        assert_eq!(repo.status, RepositoryStatus::Watching);
        assert_eq!(repo.relation_count, 1);
        assert!(repo.last_indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_file_marked_deleted() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        let file_path = repo_dir.path().join("gone.py");
        std::fs::write(&file_path, "def g():\n    pass\n").unwrap();
        service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        std::fs::remove_file(&file_path).unwrap();

        let file = service.state().dequeue_next_file().await.unwrap().unwrap();
        service.process_file(&file).await.unwrap();

        let stored = service.state().get_file(file.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Deleted);
    }

    #[tokio::test]
    async fn test_failure_promotes_to_permanent_at_budget() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        let file_path = repo_dir.path().join("x.py");
        std::fs::write(&file_path, "def x():\n    pass\n").unwrap();
        let file_id = service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        let file = service.state().get_file(file_id).await.unwrap().unwrap();
        let error = IndexError::General("boom".to_string());

        // Two failures stay retryable and re-enqueue
        service.handle_failure(&file, &error).await;
        let after_first = service.state().get_file(file_id).await.unwrap().unwrap();
        assert_eq!(after_first.status, FileStatus::Failed);
        assert_eq!(after_first.failure_count, 1);
        assert!(service.state().is_file_queued(file_id).await.unwrap());

        service.state().dequeue_next_file().await.unwrap();
        service.handle_failure(&after_first, &error).await;
        let after_second = service.state().get_file(file_id).await.unwrap().unwrap();
        assert_eq!(after_second.status, FileStatus::Failed);

        // Third failure hits max_retries => permanent, no re-enqueue
        service.state().dequeue_next_file().await.unwrap();
        service.handle_failure(&after_second, &error).await;
        let after_third = service.state().get_file(file_id).await.unwrap().unwrap();
        assert_eq!(after_third.status, FileStatus::PermanentFailure);
        assert_eq!(after_third.failure_count, 3);
        assert!(!service.state().is_file_queued(file_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_reindex_resets_failures() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (service, repo_id) = build_service(&data_dir, repo_dir.path()).await;

        let file_path = repo_dir.path().join("y.py");
        std::fs::write(&file_path, "def y():\n    pass\n").unwrap();
        let file_id = service
            .index_file(&file_path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        service
            .state()
            .update_file_failure(file_id, FileStatus::PermanentFailure, 3, Some("boom"))
            .await
            .unwrap();

        let queued = service.queue_repository(repo_id, true).await.unwrap();
        assert!(queued >= 1);

        let file = service.state().get_file(file_id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.failure_count, 0);
    }
}
