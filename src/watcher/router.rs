//! File event routing.
//!
//! Maps filesystem events to queue operations. A `deleted` event for a path
//! that still exists on disk is an editor atomic-save artifact and routes
//! to re-indexing; a real deletion purges the file's vectors and graph rows
//! and marks the row deleted. Events for unknown repositories or ignored
//! paths are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use crate::discovery::{PathNormalizer, RepositoryScanner};
use crate::error::IndexResult;
use crate::indexing::IndexingService;

/// Kind of a filesystem event delivered to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// One routed filesystem event.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub repository: String,
}

pub struct FileEventRouter {
    indexer: Arc<IndexingService>,
}

impl FileEventRouter {
    pub fn new(indexer: Arc<IndexingService>) -> Self {
        Self { indexer }
    }

    /// Route one event. Unknown repositories and ignored paths are dropped
    /// silently; per-event errors are returned for the caller to log.
    pub async fn handle(&self, event: FileEvent) -> IndexResult<()> {
        let Some(repo_config) = self.indexer.repo_config(&event.repository).cloned() else {
            tracing::debug!(repo = %event.repository, "event for unknown repository dropped");
            return Ok(());
        };

        let scanner =
            RepositoryScanner::new(&repo_config.path, self.indexer.files_config().clone());
        if scanner.is_ignored(&event.path) {
            tracing::debug!(path = %event.path.display(), "event for ignored path dropped");
            return Ok(());
        }

        let state = self.indexer.state();
        let Some(repo) = state.get_repository_by_name(&event.repository).await? else {
            return Ok(());
        };

        match event.kind {
            FileEventKind::Created | FileEventKind::Modified => {
                self.indexer
                    .index_file(&event.path, repo.id, Some(&repo_config.path), false)
                    .await?;
            }
            FileEventKind::Deleted => {
                if event.path.exists() {
                    // Atomic save: the editor replaced the file in place
                    tracing::debug!(path = %event.path.display(), "atomic save detected");
                    self.indexer
                        .index_file(&event.path, repo.id, Some(&repo_config.path), false)
                        .await?;
                } else {
                    let relative =
                        PathNormalizer::new(&repo_config.path).to_repo_relative(&event.path);
                    if let Some(file) = state.get_file_by_path(repo.id, &relative).await? {
                        self.indexer.handle_deleted_file(&file).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepositoryConfig, Settings};
    use crate::embedding::HashingEmbedder;
    use crate::extractors::ExtractorRegistry;
    use crate::indexing::FileIndexingPipeline;
    use crate::model::FileStatus;
    use crate::storage::{RelationGraph, StateDb, VectorStore};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn build_router(
        data_dir: &TempDir,
        repo_root: &std::path::Path,
    ) -> (FileEventRouter, Arc<IndexingService>, Uuid, Arc<VectorStore>) {
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

        let service = Arc::new(IndexingService::new(
            state,
            graph,
            Arc::clone(&vectors),
            pipeline,
            repo_configs,
            &settings.indexing,
            settings.files.clone(),
        ));
        let router = FileEventRouter::new(Arc::clone(&service));
        (router, service, repo_id, vectors)
    }

    #[tokio::test]
    async fn test_created_event_queues_file() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (router, service, _repo_id, _vectors) = build_router(&data_dir, repo_dir.path()).await;

        let path = repo_dir.path().join("new.py");
        std::fs::write(&path, "def f():\n    pass\n").unwrap();

        router
            .handle(FileEvent {
                kind: FileEventKind::Created,
                path,
                repository: "sdk".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(service.state().queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_repository_dropped() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (router, service, _repo_id, _vectors) = build_router(&data_dir, repo_dir.path()).await;

        router
            .handle(FileEvent {
                kind: FileEventKind::Created,
                path: repo_dir.path().join("a.py"),
                repository: "ghost".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(service.state().queue_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ignored_path_dropped() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (router, service, _repo_id, _vectors) = build_router(&data_dir, repo_dir.path()).await;

        let path = repo_dir.path().join("node_modules/pkg/index.js");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x").unwrap();

        router
            .handle(FileEvent {
                kind: FileEventKind::Created,
                path,
                repository: "sdk".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(service.state().queue_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_atomic_save_reindexes() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (router, service, repo_id, _vectors) = build_router(&data_dir, repo_dir.path()).await;

        // File exists on disk when the delete event arrives
        let path = repo_dir.path().join("foo.py");
        std::fs::write(&path, "def f():\n    pass\n").unwrap();
        service
            .index_file(&path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        service.state().dequeue_next_file().await.unwrap();
        std::fs::write(&path, "def f():\n    return 1\n").unwrap();

        router
            .handle(FileEvent {
                kind: FileEventKind::Deleted,
                path,
                repository: "sdk".to_string(),
            })
            .await
            .unwrap();

        // Re-indexed, not deleted
        let file = service
            .state()
            .get_file_by_path(repo_id, "foo.py")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(service.state().queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_real_delete_purges_rows() {
        let data_dir = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let (router, service, repo_id, vectors) = build_router(&data_dir, repo_dir.path()).await;

        let path = repo_dir.path().join("foo.py");
        std::fs::write(&path, "def f():\n    pass\n").unwrap();
        service
            .index_file(&path, repo_id, Some(repo_dir.path()), false)
            .await
            .unwrap();
        let file = service.state().dequeue_next_file().await.unwrap().unwrap();
        service.process_file(&file).await.unwrap();
        assert_eq!(vectors.count_for_file(file.id), 1);

        std::fs::remove_file(&path).unwrap();
        router
            .handle(FileEvent {
                kind: FileEventKind::Deleted,
                path,
                repository: "sdk".to_string(),
            })
            .await
            .unwrap();

        let stored = service.state().get_file(file.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Deleted);
        assert_eq!(vectors.count_for_file(file.id), 0);

        let graph = RelationGraph::new(service.state());
        assert!(graph.get_entities_for_file(file.id).await.unwrap().is_empty());
    }
}
