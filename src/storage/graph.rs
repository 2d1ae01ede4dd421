//! Relation graph: query interface over entities, relations, and pending
//! references.
//!
//! Complements [`StateDb`](crate::storage::StateDb); both share the same
//! SQLite pool. StateDb handles repositories, files, and the queue; the
//! graph handles entities, relations, and pending references.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    CodeEntity, EntityKind, EntityType, PendingRef, PendingReference, ReferenceStatus, Relation,
    RelationType, Visibility,
};

use super::state::{parse_uuid, StateDb};

/// A materialized entity row. The `kind` payload is rehydrated from JSON.
pub type Entity = CodeEntity;

#[derive(Clone)]
pub struct RelationGraph {
    pool: SqlitePool,
}

impl RelationGraph {
    pub fn new(state: &StateDb) -> Self {
        Self {
            pool: state.pool().clone(),
        }
    }

    // =========================================================================
    // Entity operations
    // =========================================================================

    pub async fn add_entity(&self, entity: &CodeEntity) -> StoreResult<()> {
        self.add_entity_on(&self.pool, entity).await
    }

    async fn add_entity_on<'e, E>(&self, executor: E, entity: &CodeEntity) -> StoreResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let decorators_json = if entity.decorators.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entity.decorators).unwrap_or_default())
        };
        let kind_json = serde_json::to_string(&entity.kind).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO entities (
                id, repository_id, file_id, qualified_name, simple_name,
                entity_type, language, line_start, line_end, col_start, col_end,
                signature, docstring, source_text, visibility, is_exported,
                decorators_json, kind_json, vector_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity.id.to_string())
        .bind(entity.repository_id.to_string())
        .bind(entity.file_id.to_string())
        .bind(&entity.qualified_name)
        .bind(&entity.name)
        .bind(entity.entity_type.as_str())
        .bind(&entity.language)
        .bind(entity.line_start as i64)
        .bind(entity.line_end as i64)
        .bind(entity.col_start.map(|c| c as i64))
        .bind(entity.col_end.map(|c| c as i64))
        .bind(&entity.signature)
        .bind(&entity.docstring)
        .bind(&entity.source_text)
        .bind(entity.visibility.as_str())
        .bind(entity.is_exported as i64)
        .bind(decorators_json)
        .bind(kind_json)
        .bind(entity.vector_id.map(|v| v.to_string()))
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(entity_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_entity(&r)))
    }

    pub async fn get_entity_by_qualified_name(&self, qualified_name: &str) -> StoreResult<Option<Entity>> {
        let row = sqlx::query(
            "SELECT * FROM entities WHERE qualified_name = ? ORDER BY LENGTH(qualified_name) LIMIT 1",
        )
        .bind(qualified_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_entity(&r)))
    }

    /// Entities whose qualified name ends with `suffix` or whose simple name
    /// equals it, shortest qualified name first.
    pub async fn get_entities_by_suffix(&self, suffix: &str, limit: u32) -> StoreResult<Vec<Entity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE qualified_name LIKE ? OR simple_name = ?
            ORDER BY LENGTH(qualified_name) ASC
            LIMIT ?
            "#,
        )
        .bind(format!("%{suffix}"))
        .bind(suffix)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    pub async fn get_entities_for_file(&self, file_id: Uuid) -> StoreResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE file_id = ? ORDER BY line_start")
            .bind(file_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    /// Delete all entities for a file; relations and pending references
    /// referencing them cascade. Returns the number of entities deleted.
    pub async fn delete_entities_for_file(&self, file_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM entities WHERE file_id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_entities_for_repository(&self, repo_id: Uuid) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM entities WHERE repository_id = ?")
            .bind(repo_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    pub async fn count_relations_for_repository(&self, repo_id: Uuid) -> StoreResult<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM relations WHERE source_repository_id = ?")
                .bind(repo_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    // =========================================================================
    // Relation operations
    // =========================================================================

    /// Add a relation between two materialized entities. Endpoint fields are
    /// denormalized from the entity rows; `is_cross_repository` is derived.
    pub async fn add_relation(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        relation_type: RelationType,
        line_number: Option<u32>,
        context_snippet: Option<&str>,
        weight: f64,
    ) -> StoreResult<Uuid> {
        let source = self
            .get_entity(source_id)
            .await?
            .ok_or(StoreError::EntityNotFound {
                id: source_id.to_string(),
            })?;
        let target = self
            .get_entity(target_id)
            .await?
            .ok_or(StoreError::EntityNotFound {
                id: target_id.to_string(),
            })?;

        let relation_id = Uuid::new_v4();
        self.insert_relation_on(
            &self.pool,
            relation_id,
            &source,
            &target,
            relation_type,
            line_number,
            context_snippet,
            weight,
        )
        .await?;
        Ok(relation_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_relation_on<'e, E>(
        &self,
        executor: E,
        relation_id: Uuid,
        source: &Entity,
        target: &Entity,
        relation_type: RelationType,
        line_number: Option<u32>,
        context_snippet: Option<&str>,
        weight: f64,
    ) -> StoreResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let is_cross_repo = source.repository_id != target.repository_id;
        sqlx::query(
            r#"
            INSERT INTO relations (
                id, source_id, source_qualified_name, source_entity_type,
                source_repository_id, target_id, target_qualified_name,
                target_entity_type, target_repository_id, relation_type,
                is_cross_repository, line_number, context_snippet, weight
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(relation_id.to_string())
        .bind(source.id.to_string())
        .bind(&source.qualified_name)
        .bind(source.entity_type.as_str())
        .bind(source.repository_id.to_string())
        .bind(target.id.to_string())
        .bind(&target.qualified_name)
        .bind(target.entity_type.as_str())
        .bind(target.repository_id.to_string())
        .bind(relation_type.as_str())
        .bind(is_cross_repo as i64)
        .bind(line_number.map(|l| l as i64))
        .bind(context_snippet)
        .bind(weight)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Relations pointing TO this entity.
    pub async fn get_incoming_relations(&self, entity_id: Uuid) -> StoreResult<Vec<Relation>> {
        let rows = sqlx::query("SELECT * FROM relations WHERE target_id = ?")
            .bind(entity_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_relation).collect())
    }

    /// Relations pointing FROM this entity.
    pub async fn get_outgoing_relations(&self, entity_id: Uuid) -> StoreResult<Vec<Relation>> {
        let rows = sqlx::query("SELECT * FROM relations WHERE source_id = ?")
            .bind(entity_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_relation).collect())
    }

    // =========================================================================
    // Pending reference operations
    // =========================================================================

    pub async fn add_pending_reference(
        &self,
        source_repository_id: Uuid,
        pending: &PendingRef,
    ) -> StoreResult<Uuid> {
        let ref_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO pending_references (
                id, source_entity_id, source_qualified_name, source_repository_id,
                target_qualified_name, relation_type, line_number, context_snippet,
                receiver_expr
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ref_id.to_string())
        .bind(pending.source_entity_id.to_string())
        .bind(&pending.source_qualified_name)
        .bind(source_repository_id.to_string())
        .bind(&pending.target_qualified_name)
        .bind(pending.relation_type.as_str())
        .bind(pending.line_number.map(|l| l as i64))
        .bind(&pending.context_snippet)
        .bind(&pending.receiver_expr)
        .execute(&self.pool)
        .await?;
        Ok(ref_id)
    }

    /// Pending references in creation order, oldest first.
    pub async fn get_pending_references(&self, limit: u32) -> StoreResult<Vec<PendingReference>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pending_references
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_pending_reference).collect())
    }

    pub async fn count_pending_references(&self) -> StoreResult<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM pending_references WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Promote a pending reference: insert the relation and flip the
    /// reference to `resolved` in one transaction, so readers observe both
    /// or neither.
    pub async fn resolve_reference(&self, ref_id: Uuid, target_entity_id: Uuid) -> StoreResult<()> {
        let row = sqlx::query("SELECT * FROM pending_references WHERE id = ?")
            .bind(ref_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ReferenceNotFound {
                id: ref_id.to_string(),
            })?;
        let pending = row_to_pending_reference(&row);

        let source = self
            .get_entity(pending.source_entity_id)
            .await?
            .ok_or(StoreError::EntityNotFound {
                id: pending.source_entity_id.to_string(),
            })?;
        let target = self
            .get_entity(target_entity_id)
            .await?
            .ok_or(StoreError::EntityNotFound {
                id: target_entity_id.to_string(),
            })?;

        let mut tx = self.pool.begin().await?;
        self.insert_relation_on(
            &mut *tx,
            Uuid::new_v4(),
            &source,
            &target,
            pending.relation_type,
            pending.line_number,
            pending.context_snippet.as_deref(),
            1.0,
        )
        .await?;
        sqlx::query(
            r#"
            UPDATE pending_references
            SET status = 'resolved',
                resolved_target_id = ?,
                resolved_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(target_entity_id.to_string())
        .bind(ref_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Increment the attempt counter; flip to `unresolved` once the budget
    /// is spent.
    pub async fn mark_reference_unresolved(&self, ref_id: Uuid, max_attempts: u32) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_references
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= ? THEN 'unresolved' ELSE status END,
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(max_attempts as i64)
        .bind(ref_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_pending_reference(&self, ref_id: Uuid) -> StoreResult<Option<PendingReference>> {
        let row = sqlx::query("SELECT * FROM pending_references WHERE id = ?")
            .bind(ref_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_pending_reference(&r)))
    }
}

fn row_to_entity(row: &SqliteRow) -> Entity {
    let entity_type_str: String = row.get("entity_type");
    let entity_type = EntityType::parse(&entity_type_str).unwrap_or(EntityType::Variable);
    let decorators: Vec<String> = row
        .get::<Option<String>, _>("decorators_json")
        .and_then(|j| serde_json::from_str(&j).ok())
        .unwrap_or_default();
    let kind: EntityKind = row
        .get::<Option<String>, _>("kind_json")
        .and_then(|j| serde_json::from_str(&j).ok())
        .unwrap_or(EntityKind::Module);
    let visibility: String = row.get("visibility");

    CodeEntity {
        id: parse_uuid(&row.get::<String, _>("id")),
        repository_id: parse_uuid(&row.get::<String, _>("repository_id")),
        file_id: parse_uuid(&row.get::<String, _>("file_id")),
        name: row.get("simple_name"),
        qualified_name: row.get("qualified_name"),
        entity_type,
        language: row.get("language"),
        line_start: row.get::<i64, _>("line_start") as u32,
        line_end: row.get::<i64, _>("line_end") as u32,
        col_start: row.get::<Option<i64>, _>("col_start").map(|c| c as u32),
        col_end: row.get::<Option<i64>, _>("col_end").map(|c| c as u32),
        signature: row.get("signature"),
        docstring: row.get("docstring"),
        source_text: row.get("source_text"),
        visibility: Visibility::parse(&visibility),
        is_exported: row.get::<i64, _>("is_exported") != 0,
        decorators,
        vector_id: row
            .get::<Option<String>, _>("vector_id")
            .map(|v| parse_uuid(&v)),
        kind,
    }
}

fn row_to_relation(row: &SqliteRow) -> Relation {
    let relation_type: String = row.get("relation_type");
    let source_type: String = row.get("source_entity_type");
    let target_type: String = row.get("target_entity_type");
    Relation {
        id: parse_uuid(&row.get::<String, _>("id")),
        source_id: parse_uuid(&row.get::<String, _>("source_id")),
        source_qualified_name: row.get("source_qualified_name"),
        source_entity_type: EntityType::parse(&source_type).unwrap_or(EntityType::Variable),
        source_repository_id: parse_uuid(&row.get::<String, _>("source_repository_id")),
        target_id: parse_uuid(&row.get::<String, _>("target_id")),
        target_qualified_name: row.get("target_qualified_name"),
        target_entity_type: EntityType::parse(&target_type).unwrap_or(EntityType::Variable),
        target_repository_id: parse_uuid(&row.get::<String, _>("target_repository_id")),
        relation_type: RelationType::parse(&relation_type).unwrap_or(RelationType::References),
        is_cross_repository: row.get::<i64, _>("is_cross_repository") != 0,
        line_number: row.get::<Option<i64>, _>("line_number").map(|l| l as u32),
        context_snippet: row.get("context_snippet"),
        weight: row.get("weight"),
    }
}

fn row_to_pending_reference(row: &SqliteRow) -> PendingReference {
    let relation_type: String = row.get("relation_type");
    let status: String = row.get("status");
    PendingReference {
        id: parse_uuid(&row.get::<String, _>("id")),
        source_entity_id: parse_uuid(&row.get::<String, _>("source_entity_id")),
        source_qualified_name: row.get("source_qualified_name"),
        source_repository_id: parse_uuid(&row.get::<String, _>("source_repository_id")),
        target_qualified_name: row.get("target_qualified_name"),
        relation_type: RelationType::parse(&relation_type).unwrap_or(RelationType::References),
        status: ReferenceStatus::parse(&status).unwrap_or(ReferenceStatus::Pending),
        attempts: row.get::<i64, _>("attempts") as u32,
        resolved_target_id: row
            .get::<Option<String>, _>("resolved_target_id")
            .map(|v| parse_uuid(&v)),
        line_number: row.get::<Option<i64>, _>("line_number").map(|l| l as u32),
        context_snippet: row.get("context_snippet"),
        receiver_expr: row.get("receiver_expr"),
    }
}
