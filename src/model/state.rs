//! Repository and file state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Pending,
    Indexing,
    Watching,
    Error,
    Paused,
}

impl RepositoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Watching => "watching",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "indexing" => Some(Self::Indexing),
            "watching" => Some(Self::Watching),
            "error" => Some(Self::Error),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Lifecycle of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
    PermanentFailure,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
            Self::PermanentFailure => "permanent_failure",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            "permanent_failure" => Some(Self::PermanentFailure),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A watched source repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub name: String,
    pub status: RepositoryStatus,
    pub file_count: u64,
    pub entity_count: u64,
    pub relation_count: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_indexed_commit: Option<String>,
    pub error_message: Option<String>,
}

/// One file tracked by the index. Unique per `(repository_id, path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    pub id: Uuid,
    pub repository_id: Uuid,
    /// Repo-relative, POSIX-normalized path
    pub path: String,
    /// SHA-256 content hash
    pub checksum: String,
    pub file_size: u64,
    pub language: Option<String>,
    pub status: FileStatus,
    pub failure_count: u32,
    pub error_message: Option<String>,
    pub entity_count: u64,
    pub last_modified_at: DateTime<Utc>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// One entry in the persistent work queue. FIFO within a priority band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub file_id: Uuid,
    pub repository_id: Uuid,
    pub priority: i64,
    pub queued_at: DateTime<Utc>,
}
