//! Reference and usage traversal.

use crate::error::IndexResult;
use crate::model::Relation;
use crate::model::responses::{ReferenceItem, ReferencesResponse};
use crate::storage::graph::Entity;
use crate::storage::{RelationGraph, StateDb};

/// All references to a symbol identified by qualified name (suffix
/// fallback on exact miss); outgoing edges included on request.
pub async fn get_symbol_references(
    qualified_name: &str,
    graph: &RelationGraph,
    state: &StateDb,
    include_outgoing: bool,
) -> IndexResult<ReferencesResponse> {
    let Some(entity) = resolve_entity(qualified_name, graph).await? else {
        return Ok(ReferencesResponse {
            qualified_name: qualified_name.to_string(),
            incoming_count: 0,
            outgoing_count: 0,
            references: Vec::new(),
            message: Some(format!("Symbol '{qualified_name}' not found")),
        });
    };

    build_references(&entity, graph, state, include_outgoing, None).await
}

/// Find all usages of a symbol by simple or qualified name, optionally
/// restricted to one repository.
pub async fn find_usages(
    symbol_name: &str,
    graph: &RelationGraph,
    state: &StateDb,
    repository: Option<&str>,
) -> IndexResult<ReferencesResponse> {
    let repo_filter = match repository {
        Some(name) => match state.get_repository_by_name(name).await? {
            Some(repo) => Some(repo.id),
            None => {
                return Ok(ReferencesResponse {
                    qualified_name: symbol_name.to_string(),
                    incoming_count: 0,
                    outgoing_count: 0,
                    references: Vec::new(),
                    message: Some(format!("Repository '{name}' not found")),
                });
            }
        },
        None => None,
    };

    let Some(entity) = resolve_entity(symbol_name, graph).await? else {
        return Ok(ReferencesResponse {
            qualified_name: symbol_name.to_string(),
            incoming_count: 0,
            outgoing_count: 0,
            references: Vec::new(),
            message: Some(format!("Symbol '{symbol_name}' not found")),
        });
    };

    build_references(&entity, graph, state, false, repo_filter).await
}

async fn resolve_entity(
    name: &str,
    graph: &RelationGraph,
) -> IndexResult<Option<Entity>> {
    if let Some(entity) = graph.get_entity_by_qualified_name(name).await? {
        return Ok(Some(entity));
    }
    Ok(graph
        .get_entities_by_suffix(name, 1)
        .await?
        .into_iter()
        .next())
}

async fn build_references(
    entity: &Entity,
    graph: &RelationGraph,
    state: &StateDb,
    include_outgoing: bool,
    repo_filter: Option<uuid::Uuid>,
) -> IndexResult<ReferencesResponse> {
    let incoming = graph.get_incoming_relations(entity.id).await?;
    let outgoing = if include_outgoing {
        graph.get_outgoing_relations(entity.id).await?
    } else {
        Vec::new()
    };

    let mut references = Vec::new();
    for relation in &incoming {
        if let Some(filter) = repo_filter
            && relation.source_repository_id != filter
        {
            continue;
        }
        references.push(reference_item(relation, graph, state, true).await?);
    }
    for relation in &outgoing {
        references.push(reference_item(relation, graph, state, false).await?);
    }

    Ok(ReferencesResponse {
        qualified_name: entity.qualified_name.clone(),
        incoming_count: incoming.len(),
        outgoing_count: outgoing.len(),
        references,
        message: None,
    })
}

/// One response row. Incoming rows point at the referencing entity;
/// outgoing rows point at the referenced target.
async fn reference_item(
    relation: &Relation,
    graph: &RelationGraph,
    state: &StateDb,
    incoming: bool,
) -> IndexResult<ReferenceItem> {
    let (endpoint_id, endpoint_qualified, endpoint_repo) = if incoming {
        (
            relation.source_id,
            &relation.source_qualified_name,
            relation.source_repository_id,
        )
    } else {
        (
            relation.target_id,
            &relation.target_qualified_name,
            relation.target_repository_id,
        )
    };

    let file_path = match graph.get_entity(endpoint_id).await? {
        Some(endpoint) => state
            .get_file(endpoint.file_id)
            .await?
            .map(|f| f.path)
            .unwrap_or_default(),
        None => String::new(),
    };
    let repository = state
        .get_repository(endpoint_repo)
        .await?
        .map(|r| r.name)
        .unwrap_or_default();

    Ok(ReferenceItem {
        file_path,
        repository,
        line_number: relation.line_number,
        relation_type: relation.relation_type.as_str().to_string(),
        context_snippet: relation.context_snippet.clone(),
        source_entity: Some(endpoint_qualified.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeEntity, EntityKind, FunctionDetail, RelationType};
    use uuid::Uuid;

    async fn seed() -> (StateDb, RelationGraph, CodeEntity, CodeEntity) {
        let state = StateDb::in_memory().await.unwrap();
        let graph = RelationGraph::new(&state);
        let repo = state.create_repository("sdk").await.unwrap();
        let file = Uuid::new_v4();

        let caller = CodeEntity::new(
            repo,
            file,
            "python",
            "main",
            "app.main",
            1,
            5,
            EntityKind::Function(FunctionDetail::default()),
        );
        let callee = CodeEntity::new(
            repo,
            file,
            "python",
            "helper",
            "util.helper",
            1,
            5,
            EntityKind::Function(FunctionDetail::default()),
        );
        graph.add_entity(&caller).await.unwrap();
        graph.add_entity(&callee).await.unwrap();
        graph
            .add_relation(
                caller.id,
                callee.id,
                RelationType::Calls,
                Some(3),
                Some("helper()"),
                1.0,
            )
            .await
            .unwrap();
        (state, graph, caller, callee)
    }

    #[tokio::test]
    async fn test_incoming_references() {
        let (state, graph, _caller, callee) = seed().await;

        let response = get_symbol_references("util.helper", &graph, &state, false)
            .await
            .unwrap();
        assert_eq!(response.incoming_count, 1);
        assert_eq!(response.outgoing_count, 0);
        assert_eq!(response.references.len(), 1);
        assert_eq!(
            response.references[0].source_entity.as_deref(),
            Some("app.main")
        );
        assert_eq!(response.references[0].line_number, Some(3));
        assert_eq!(response.qualified_name, callee.qualified_name);
    }

    #[tokio::test]
    async fn test_outgoing_references_included_on_request() {
        let (state, graph, caller, _callee) = seed().await;

        let response = get_symbol_references(&caller.qualified_name, &graph, &state, true)
            .await
            .unwrap();
        assert_eq!(response.incoming_count, 0);
        assert_eq!(response.outgoing_count, 1);
        assert_eq!(
            response.references[0].source_entity.as_deref(),
            Some("util.helper")
        );
    }

    #[tokio::test]
    async fn test_find_usages_by_simple_name() {
        let (state, graph, _caller, _callee) = seed().await;

        let response = find_usages("helper", &graph, &state, None).await.unwrap();
        assert_eq!(response.incoming_count, 1);

        let filtered = find_usages("helper", &graph, &state, Some("sdk"))
            .await
            .unwrap();
        assert_eq!(filtered.references.len(), 1);

        let missing_repo = find_usages("helper", &graph, &state, Some("ghost"))
            .await
            .unwrap();
        assert!(missing_repo.message.is_some());
    }
}
