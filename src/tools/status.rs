//! Index status and reindex operations.

use std::sync::Arc;

use crate::error::{IndexError, IndexResult};
use crate::indexing::IndexingService;
use crate::model::FileStatus;
use crate::model::responses::{IndexStatusResponse, ReindexResponse, RepositoryStatusItem};
use crate::storage::StateDb;

/// Per-repository indexing status, optionally filtered to one repository.
pub async fn get_index_status(
    state: &StateDb,
    repository: Option<&str>,
    is_writer: bool,
) -> IndexResult<IndexStatusResponse> {
    let repositories = match repository {
        Some(name) => match state.get_repository_by_name(name).await? {
            Some(repo) => vec![repo],
            None => {
                return Ok(IndexStatusResponse {
                    repositories: Vec::new(),
                    queue_length: 0,
                    is_writer,
                    message: Some(format!("Repository '{name}' not found")),
                });
            }
        },
        None => state.get_all_repositories().await?,
    };

    let mut items = Vec::with_capacity(repositories.len());
    for repo in repositories {
        let pending = state
            .count_files_with_status(repo.id, FileStatus::Pending)
            .await?;
        let failed = state.count_failed_files(repo.id).await?;
        items.push(RepositoryStatusItem {
            name: repo.name,
            status: repo.status.as_str().to_string(),
            file_count: repo.file_count,
            entity_count: repo.entity_count,
            relation_count: repo.relation_count,
            pending_files: pending,
            failed_files: failed,
            last_indexed_at: repo.last_indexed_at.map(|t| t.to_rfc3339()),
            last_indexed_commit: repo.last_indexed_commit,
            error_message: repo.error_message,
        });
    }

    Ok(IndexStatusResponse {
        repositories: items,
        queue_length: state.queue_length().await?,
        is_writer,
        message: None,
    })
}

/// Queue a repository for reindexing. `force` resets failure counts and
/// reindexes every file regardless of checksums.
pub async fn reindex_repository(
    state: &StateDb,
    indexer: &Arc<IndexingService>,
    repository: &str,
    force: bool,
) -> IndexResult<ReindexResponse> {
    let Some(repo) = state.get_repository_by_name(repository).await? else {
        return Ok(ReindexResponse {
            repository: repository.to_string(),
            status: "error".to_string(),
            files_queued: 0,
            message: Some(format!("Repository '{repository}' not found")),
        });
    };

    match indexer.queue_repository(repo.id, force).await {
        Ok(files_queued) => Ok(ReindexResponse {
            repository: repository.to_string(),
            status: "queued".to_string(),
            files_queued,
            message: None,
        }),
        Err(IndexError::RepositoryNotConfigured { name }) => Ok(ReindexResponse {
            repository: repository.to_string(),
            status: "error".to_string(),
            files_queued: 0,
            message: Some(format!("Repository '{name}' is not in the configuration file")),
        }),
        Err(e) => Err(e),
    }
}
