//! SQLite state database.
//!
//! Tracks repositories, indexed files, and the persistent indexing queue.
//! Schema changes are applied as versioned migrations on startup. The
//! connection runs in WAL mode so read-only instances can query while the
//! writer indexes.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{FileStatus, IndexedFile, Repository, RepositoryStatus};

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V001_INITIAL), (2, MIGRATION_V002_RECEIVER_EXPR)];

const MIGRATION_V001_INITIAL: &str = r#"
CREATE TABLE repositories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending',
    file_count INTEGER NOT NULL DEFAULT 0,
    entity_count INTEGER NOT NULL DEFAULT 0,
    relation_count INTEGER NOT NULL DEFAULT 0,
    last_indexed_at TEXT,
    last_indexed_commit TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE indexed_files (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    checksum TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    failure_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    entity_count INTEGER NOT NULL DEFAULT 0,
    last_modified_at TEXT NOT NULL,
    last_indexed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(repository_id, path)
);
CREATE INDEX idx_files_repo_status ON indexed_files(repository_id, status);

CREATE TABLE indexing_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id TEXT NOT NULL UNIQUE,
    repository_id TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_queue_priority ON indexing_queue(priority DESC, id ASC);

CREATE TABLE entities (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL,
    file_id TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    simple_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    language TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    col_start INTEGER,
    col_end INTEGER,
    signature TEXT,
    docstring TEXT,
    source_text TEXT,
    visibility TEXT NOT NULL DEFAULT 'public',
    is_exported INTEGER NOT NULL DEFAULT 0,
    decorators_json TEXT,
    kind_json TEXT,
    vector_id TEXT
);
CREATE INDEX idx_entities_qualified ON entities(qualified_name);
CREATE INDEX idx_entities_simple ON entities(simple_name);
CREATE INDEX idx_entities_file ON entities(file_id);
CREATE INDEX idx_entities_repo ON entities(repository_id);

CREATE TABLE relations (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    source_qualified_name TEXT NOT NULL,
    source_entity_type TEXT NOT NULL,
    source_repository_id TEXT NOT NULL,
    target_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_qualified_name TEXT NOT NULL,
    target_entity_type TEXT NOT NULL,
    target_repository_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    is_cross_repository INTEGER NOT NULL DEFAULT 0,
    line_number INTEGER,
    context_snippet TEXT,
    weight REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX idx_relations_source ON relations(source_id);
CREATE INDEX idx_relations_target ON relations(target_id);

CREATE TABLE pending_references (
    id TEXT PRIMARY KEY,
    source_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    source_qualified_name TEXT NOT NULL,
    source_repository_id TEXT NOT NULL,
    target_qualified_name TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    resolved_target_id TEXT,
    line_number INTEGER,
    context_snippet TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    resolved_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_pending_status ON pending_references(status, created_at);
"#;

const MIGRATION_V002_RECEIVER_EXPR: &str = r#"
ALTER TABLE pending_references ADD COLUMN receiver_expr TEXT;
"#;

/// SQLite database for indexing state.
///
/// Handles repository and file state tracking plus queue management. Entity
/// and relation queries live in [`crate::storage::RelationGraph`], which
/// shares this pool.
#[derive(Clone)]
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open (creating if missing) a state database at `path` and apply
    /// migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Migration {
                version: 0,
                reason: format!("cannot create data directory: {e}"),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.apply_migrations().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        // A single connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.apply_migrations().await?;
        Ok(db)
    }

    /// The shared connection pool (used by the relation graph).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
        )
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT MAX(version) AS version FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        let current: Option<i64> = row.get("version");
        let current = current.unwrap_or(0) as u32;

        for (version, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Migration {
                        version: *version,
                        reason: e.to_string(),
                    })?;
            }
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(*version as i64)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    // =========================================================================
    // Repository operations
    // =========================================================================

    pub async fn create_repository(&self, name: &str) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO repositories (id, name, status) VALUES (?, ?, 'pending')")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_repository(&self, repo_id: Uuid) -> StoreResult<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(repo_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_repository(&r)))
    }

    pub async fn get_repository_by_name(&self, name: &str) -> StoreResult<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_repository(&r)))
    }

    pub async fn get_all_repositories(&self) -> StoreResult<Vec<Repository>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_repository).collect())
    }

    pub async fn update_repository_status(
        &self,
        repo_id: Uuid,
        status: RepositoryStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE repositories SET status = ?, error_message = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(repo_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update aggregate counts and indexing metadata. Only provided fields
    /// are touched.
    pub async fn update_repository_stats(
        &self,
        repo_id: Uuid,
        file_count: Option<u64>,
        entity_count: Option<u64>,
        relation_count: Option<u64>,
        last_indexed_at: Option<DateTime<Utc>>,
        status: Option<RepositoryStatus>,
    ) -> StoreResult<()> {
        let mut updates = Vec::new();
        if file_count.is_some() {
            updates.push("file_count = ?");
        }
        if entity_count.is_some() {
            updates.push("entity_count = ?");
        }
        if relation_count.is_some() {
            updates.push("relation_count = ?");
        }
        if last_indexed_at.is_some() {
            updates.push("last_indexed_at = ?");
        }
        if status.is_some() {
            updates.push("status = ?");
        }
        if updates.is_empty() {
            return Ok(());
        }
        updates.push("updated_at = datetime('now')");

        let sql = format!(
            "UPDATE repositories SET {} WHERE id = ?",
            updates.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(v) = file_count {
            query = query.bind(v as i64);
        }
        if let Some(v) = entity_count {
            query = query.bind(v as i64);
        }
        if let Some(v) = relation_count {
            query = query.bind(v as i64);
        }
        if let Some(v) = last_indexed_at {
            query = query.bind(v.to_rfc3339());
        }
        if let Some(v) = status {
            query = query.bind(v.as_str());
        }
        query.bind(repo_id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn set_repository_commit(&self, repo_id: Uuid, commit: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE repositories SET last_indexed_commit = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(commit)
        .bind(repo_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_repository(&self, repo_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(repo_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // File operations
    // =========================================================================

    /// Insert or update a file row. On `(repository_id, path)` conflict the
    /// existing row keeps its id; the returned id is the one actually stored.
    pub async fn upsert_file(&self, file: &IndexedFile) -> StoreResult<Uuid> {
        self.upsert_file_on(&self.pool, file).await?;
        let row = sqlx::query("SELECT id FROM indexed_files WHERE repository_id = ? AND path = ?")
            .bind(file.repository_id.to_string())
            .bind(&file.path)
            .fetch_one(&self.pool)
            .await?;
        let id: String = row.get("id");
        Ok(parse_uuid(&id))
    }

    async fn upsert_file_on<'e, E>(&self, executor: E, file: &IndexedFile) -> StoreResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO indexed_files (
                id, repository_id, path, checksum, file_size, language,
                status, failure_count, error_message, entity_count,
                last_modified_at, last_indexed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository_id, path) DO UPDATE SET
                checksum = excluded.checksum,
                file_size = excluded.file_size,
                language = excluded.language,
                status = excluded.status,
                last_modified_at = excluded.last_modified_at,
                updated_at = datetime('now')
            "#,
        )
        .bind(file.id.to_string())
        .bind(file.repository_id.to_string())
        .bind(&file.path)
        .bind(&file.checksum)
        .bind(file.file_size as i64)
        .bind(&file.language)
        .bind(file.status.as_str())
        .bind(file.failure_count as i64)
        .bind(&file.error_message)
        .bind(file.entity_count as i64)
        .bind(file.last_modified_at.to_rfc3339())
        .bind(file.last_indexed_at.map(|t| t.to_rfc3339()))
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Upsert the file row and enqueue it in one transaction, so a crash
    /// between the two writes cannot orphan a pending file.
    pub async fn upsert_file_and_enqueue(&self, file: &IndexedFile) -> StoreResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        self.upsert_file_on(&mut *tx, file).await?;
        let row = sqlx::query("SELECT id FROM indexed_files WHERE repository_id = ? AND path = ?")
            .bind(file.repository_id.to_string())
            .bind(&file.path)
            .fetch_one(&mut *tx)
            .await?;
        let id: String = row.get("id");
        sqlx::query(
            "INSERT OR IGNORE INTO indexing_queue (file_id, repository_id, priority) VALUES (?, ?, 0)",
        )
        .bind(&id)
        .bind(file.repository_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(parse_uuid(&id))
    }

    pub async fn get_file(&self, file_id: Uuid) -> StoreResult<Option<IndexedFile>> {
        let row = sqlx::query("SELECT * FROM indexed_files WHERE id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_file(&r)))
    }

    pub async fn get_file_by_path(
        &self,
        repo_id: Uuid,
        path: &str,
    ) -> StoreResult<Option<IndexedFile>> {
        let row = sqlx::query("SELECT * FROM indexed_files WHERE repository_id = ? AND path = ?")
            .bind(repo_id.to_string())
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_file(&r)))
    }

    pub async fn list_files_by_repository(&self, repo_id: Uuid) -> StoreResult<Vec<IndexedFile>> {
        let rows = sqlx::query("SELECT * FROM indexed_files WHERE repository_id = ? ORDER BY path")
            .bind(repo_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }

    /// Mark all files in a repository pending, optionally clearing failure
    /// history. Returns the number of pending files afterwards.
    pub async fn mark_repository_files_pending(
        &self,
        repo_id: Uuid,
        reset_failures: bool,
    ) -> StoreResult<u64> {
        if reset_failures {
            sqlx::query(
                "UPDATE indexed_files SET status = 'pending', failure_count = 0, error_message = NULL WHERE repository_id = ?",
            )
            .bind(repo_id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE indexed_files SET status = 'pending' WHERE repository_id = ?")
                .bind(repo_id.to_string())
                .execute(&self.pool)
                .await?;
        }
        self.count_files_with_status(repo_id, FileStatus::Pending)
            .await
    }

    /// Enqueue every pending file of a repository. Returns enqueued count.
    pub async fn enqueue_pending_files(&self, repo_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO indexing_queue (file_id, repository_id)
            SELECT id, repository_id FROM indexed_files
            WHERE repository_id = ? AND status = 'pending'
            "#,
        )
        .bind(repo_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_file_status(&self, file_id: Uuid, status: FileStatus) -> StoreResult<()> {
        sqlx::query(
            "UPDATE indexed_files SET status = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(file_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a file indexed with its entity count.
    pub async fn update_file_indexed(&self, file_id: Uuid, entity_count: u64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE indexed_files
            SET status = 'indexed',
                entity_count = ?,
                error_message = NULL,
                last_indexed_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(entity_count as i64)
        .bind(file_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_file_failure(
        &self,
        file_id: Uuid,
        status: FileStatus,
        failure_count: u32,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE indexed_files
            SET status = ?, failure_count = ?, error_message = ?, updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(failure_count as i64)
        .bind(error_message)
        .bind(file_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_files_with_status(
        &self,
        repo_id: Uuid,
        status: FileStatus,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM indexed_files WHERE repository_id = ? AND status = ?",
        )
        .bind(repo_id.to_string())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Files with failed or permanent_failure status.
    pub async fn count_failed_files(&self, repo_id: Uuid) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM indexed_files WHERE repository_id = ? AND status IN ('failed', 'permanent_failure')",
        )
        .bind(repo_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Files stuck in `failed` (eligible for the retry sweep).
    pub async fn get_retryable_failed_files(&self) -> StoreResult<Vec<IndexedFile>> {
        let rows = sqlx::query("SELECT * FROM indexed_files WHERE status = 'failed'")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }

    // =========================================================================
    // Queue operations
    // =========================================================================

    /// Add a file to the queue. `INSERT OR IGNORE` keeps it idempotent.
    pub async fn enqueue_file(&self, file_id: Uuid, repo_id: Uuid, priority: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO indexing_queue (file_id, repository_id, priority) VALUES (?, ?, ?)",
        )
        .bind(file_id.to_string())
        .bind(repo_id.to_string())
        .bind(priority)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically remove and return the next queued file (priority first,
    /// then FIFO by insertion id). `DELETE ... RETURNING` keeps the pop a
    /// single statement.
    pub async fn dequeue_next_file(&self) -> StoreResult<Option<IndexedFile>> {
        let popped = sqlx::query(
            r#"
            DELETE FROM indexing_queue
            WHERE id = (
                SELECT id FROM indexing_queue
                ORDER BY priority DESC, id ASC
                LIMIT 1
            )
            RETURNING file_id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = popped else {
            return Ok(None);
        };
        let file_id: String = row.get("file_id");
        self.get_file(parse_uuid(&file_id)).await
    }

    pub async fn queue_length(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM indexing_queue")
            .fetch_one(&self.pool)
            .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    pub async fn queue_length_for_repository(&self, repo_id: Uuid) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM indexing_queue WHERE repository_id = ?")
            .bind(repo_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    pub async fn is_file_queued(&self, file_id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM indexing_queue WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // =========================================================================
    // Crash recovery
    // =========================================================================

    /// Reset interrupted operations after a crash. Restores the invariant
    /// that a file is queued iff its status is `pending`.
    ///
    /// Returns the number of files reset from `processing`.
    pub async fn recover_from_crash(&self) -> StoreResult<u64> {
        let reset = sqlx::query(
            "UPDATE indexed_files SET status = 'pending' WHERE status = 'processing'",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO indexing_queue (file_id, repository_id)
            SELECT id, repository_id FROM indexed_files
            WHERE status = 'pending'
            AND id NOT IN (SELECT file_id FROM indexing_queue)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE repositories SET status = 'pending' WHERE status = 'indexing'")
            .execute(&self.pool)
            .await?;

        Ok(reset)
    }
}

pub(crate) fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') emits "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_repository(row: &SqliteRow) -> Repository {
    let status: String = row.get("status");
    let last_indexed: Option<String> = row.get("last_indexed_at");
    Repository {
        id: parse_uuid(&row.get::<String, _>("id")),
        name: row.get("name"),
        status: RepositoryStatus::parse(&status).unwrap_or(RepositoryStatus::Pending),
        file_count: row.get::<i64, _>("file_count") as u64,
        entity_count: row.get::<i64, _>("entity_count") as u64,
        relation_count: row.get::<i64, _>("relation_count") as u64,
        last_indexed_at: last_indexed.as_deref().map(parse_timestamp),
        last_indexed_commit: row.get("last_indexed_commit"),
        error_message: row.get("error_message"),
    }
}

fn row_to_file(row: &SqliteRow) -> IndexedFile {
    let status: String = row.get("status");
    let last_indexed: Option<String> = row.get("last_indexed_at");
    let modified: String = row.get("last_modified_at");
    IndexedFile {
        id: parse_uuid(&row.get::<String, _>("id")),
        repository_id: parse_uuid(&row.get::<String, _>("repository_id")),
        path: row.get("path"),
        checksum: row.get("checksum"),
        file_size: row.get::<i64, _>("file_size") as u64,
        language: row.get("language"),
        status: FileStatus::parse(&status).unwrap_or(FileStatus::Pending),
        failure_count: row.get::<i64, _>("failure_count") as u32,
        error_message: row.get("error_message"),
        entity_count: row.get::<i64, _>("entity_count") as u64,
        last_modified_at: parse_timestamp(&modified),
        last_indexed_at: last_indexed.as_deref().map(parse_timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileStatus;

    fn sample_file(repo_id: Uuid, path: &str) -> IndexedFile {
        IndexedFile {
            id: Uuid::new_v4(),
            repository_id: repo_id,
            path: path.to_string(),
            checksum: "abc123".to_string(),
            file_size: 42,
            language: Some("python".to_string()),
            status: FileStatus::Pending,
            failure_count: 0,
            error_message: None,
            entity_count: 0,
            last_modified_at: Utc::now(),
            last_indexed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_repository() {
        let db = StateDb::in_memory().await.unwrap();
        let id = db.create_repository("sdk").await.unwrap();

        let repo = db.get_repository(id).await.unwrap().unwrap();
        assert_eq!(repo.name, "sdk");
        assert_eq!(repo.status, RepositoryStatus::Pending);

        let by_name = db.get_repository_by_name("sdk").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert!(db.get_repository_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_file_keeps_existing_id_on_conflict() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();

        let first = sample_file(repo_id, "src/a.py");
        let stored_id = db.upsert_file(&first).await.unwrap();
        assert_eq!(stored_id, first.id);

        // Same (repo, path) with a new candidate id: the original id wins.
        let mut second = sample_file(repo_id, "src/a.py");
        second.checksum = "def456".to_string();
        let stored_again = db.upsert_file(&second).await.unwrap();
        assert_eq!(stored_again, first.id);

        let fetched = db.get_file(first.id).await.unwrap().unwrap();
        assert_eq!(fetched.checksum, "def456");
    }

    #[tokio::test]
    async fn test_queue_fifo_with_priority() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();

        let low1 = sample_file(repo_id, "a.py");
        let low2 = sample_file(repo_id, "b.py");
        let high = sample_file(repo_id, "c.py");
        for f in [&low1, &low2, &high] {
            db.upsert_file(f).await.unwrap();
        }
        db.enqueue_file(low1.id, repo_id, 0).await.unwrap();
        db.enqueue_file(low2.id, repo_id, 0).await.unwrap();
        db.enqueue_file(high.id, repo_id, 5).await.unwrap();

        // Highest priority first, then FIFO
        assert_eq!(db.dequeue_next_file().await.unwrap().unwrap().id, high.id);
        assert_eq!(db.dequeue_next_file().await.unwrap().unwrap().id, low1.id);
        assert_eq!(db.dequeue_next_file().await.unwrap().unwrap().id, low2.id);
        assert!(db.dequeue_next_file().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();
        let file = sample_file(repo_id, "a.py");
        db.upsert_file(&file).await.unwrap();

        db.enqueue_file(file.id, repo_id, 0).await.unwrap();
        db.enqueue_file(file.id, repo_id, 0).await.unwrap();
        assert_eq!(db.queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_crash_recovery_restores_queue_coherence() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();
        db.update_repository_status(repo_id, RepositoryStatus::Indexing, None)
            .await
            .unwrap();

        // One file stuck processing, one pending but not queued, one indexed
        let processing = sample_file(repo_id, "a.py");
        let pending = sample_file(repo_id, "b.py");
        let indexed = sample_file(repo_id, "c.py");
        for f in [&processing, &pending, &indexed] {
            db.upsert_file(f).await.unwrap();
        }
        db.update_file_status(processing.id, FileStatus::Processing)
            .await
            .unwrap();
        db.update_file_indexed(indexed.id, 3).await.unwrap();

        let recovered = db.recover_from_crash().await.unwrap();
        assert_eq!(recovered, 1);

        // Every pending file is queued exactly once; indexed files are not
        assert!(db.is_file_queued(processing.id).await.unwrap());
        assert!(db.is_file_queued(pending.id).await.unwrap());
        assert!(!db.is_file_queued(indexed.id).await.unwrap());
        assert_eq!(db.queue_length().await.unwrap(), 2);

        let repo = db.get_repository(repo_id).await.unwrap().unwrap();
        assert_eq!(repo.status, RepositoryStatus::Pending);
    }

    #[tokio::test]
    async fn test_upsert_and_enqueue_atomic() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();
        let file = sample_file(repo_id, "a.py");

        let id = db.upsert_file_and_enqueue(&file).await.unwrap();
        assert!(db.is_file_queued(id).await.unwrap());
        assert_eq!(
            db.get_file(id).await.unwrap().unwrap().status,
            FileStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_failure_bookkeeping() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();
        let file = sample_file(repo_id, "a.py");
        db.upsert_file(&file).await.unwrap();

        db.update_file_failure(file.id, FileStatus::Failed, 1, Some("boom"))
            .await
            .unwrap();
        let failed = db.get_retryable_failed_files().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_count, 1);
        assert_eq!(db.count_failed_files(repo_id).await.unwrap(), 1);

        db.update_file_failure(file.id, FileStatus::PermanentFailure, 3, Some("boom"))
            .await
            .unwrap();
        assert!(db.get_retryable_failed_files().await.unwrap().is_empty());
        assert_eq!(db.count_failed_files(repo_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_pending_resets_failures() {
        let db = StateDb::in_memory().await.unwrap();
        let repo_id = db.create_repository("sdk").await.unwrap();
        let file = sample_file(repo_id, "a.py");
        db.upsert_file(&file).await.unwrap();
        db.update_file_failure(file.id, FileStatus::PermanentFailure, 3, Some("boom"))
            .await
            .unwrap();

        let count = db
            .mark_repository_files_pending(repo_id, true)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let fetched = db.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, FileStatus::Pending);
        assert_eq!(fetched.failure_count, 0);
        assert!(fetched.error_message.is_none());

        let enqueued = db.enqueue_pending_files(repo_id).await.unwrap();
        assert_eq!(enqueued, 1);
    }
}
