//! Semantic search and symbol lookup.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::IndexResult;
use crate::model::responses::{
    SearchResponse, SearchResult, SymbolRecord, SymbolResponse,
};
use crate::model::EntityKind;
use crate::storage::graph::Entity;
use crate::storage::{RelationGraph, SearchFilters, StateDb, VectorStore};

/// Search for code by semantic similarity, with optional repository,
/// language, and entity-type filters.
#[allow(clippy::too_many_arguments)]
pub async fn search_code(
    query: &str,
    embedder: &Arc<dyn Embedder>,
    vectors: &VectorStore,
    state: &StateDb,
    limit: usize,
    repository: Option<&str>,
    language: Option<&str>,
    entity_type: Option<&str>,
) -> IndexResult<SearchResponse> {
    let limit = limit.clamp(1, 100);

    let mut filters = SearchFilters {
        repository_id: None,
        language: language.map(str::to_string),
        entity_type: entity_type.map(str::to_string),
    };
    if let Some(repo_name) = repository {
        match state.get_repository_by_name(repo_name).await? {
            Some(repo) => filters.repository_id = Some(repo.id),
            None => {
                return Ok(SearchResponse {
                    query: query.to_string(),
                    results: Vec::new(),
                    total: 0,
                    message: Some(format!("Repository '{repo_name}' not found")),
                });
            }
        }
    }

    let query_vector = embedder.embed_query(query).await?;
    let hits = vectors.search(&query_vector, limit, &filters);

    let mut repo_names = std::collections::HashMap::new();
    let mut results = Vec::with_capacity(hits.len());
    for (record, score) in hits {
        if !repo_names.contains_key(&record.repository_id) {
            let name = state
                .get_repository(record.repository_id)
                .await?
                .map(|r| r.name)
                .unwrap_or_default();
            repo_names.insert(record.repository_id, name);
        }
        let repo_name = repo_names[&record.repository_id].clone();

        results.push(SearchResult {
            id: record.id.to_string(),
            repository: repo_name,
            file_path: record.file_path,
            qualified_name: record.qualified_name,
            simple_name: record.simple_name,
            entity_type: record.entity_type,
            line_start: record.line_start,
            line_end: record.line_end,
            score,
            signature: record.signature,
            docstring: record.docstring,
            snippet: None,
        });
    }

    let total = results.len();
    Ok(SearchResponse {
        query: query.to_string(),
        results,
        total,
        message: None,
    })
}

/// Look up a symbol by qualified name, falling back to suffix search on an
/// exact miss.
pub async fn find_symbol(
    qualified_name: &str,
    graph: &RelationGraph,
    state: &StateDb,
    include_source: bool,
) -> IndexResult<SymbolResponse> {
    let entity = match graph.get_entity_by_qualified_name(qualified_name).await? {
        Some(entity) => Some(entity),
        None => graph
            .get_entities_by_suffix(qualified_name, 1)
            .await?
            .into_iter()
            .next(),
    };

    let Some(entity) = entity else {
        return Ok(SymbolResponse {
            qualified_name: qualified_name.to_string(),
            found: false,
            symbol: None,
            message: Some(format!("Symbol '{qualified_name}' not found")),
        });
    };

    let record = symbol_record(&entity, state, include_source).await?;
    Ok(SymbolResponse {
        qualified_name: qualified_name.to_string(),
        found: true,
        symbol: Some(record),
        message: None,
    })
}

pub(crate) async fn symbol_record(
    entity: &Entity,
    state: &StateDb,
    include_source: bool,
) -> IndexResult<SymbolRecord> {
    let file_path = state
        .get_file(entity.file_id)
        .await?
        .map(|f| f.path)
        .unwrap_or_default();
    let repository = state
        .get_repository(entity.repository_id)
        .await?
        .map(|r| r.name)
        .unwrap_or_default();

    let (base_classes, parameters, return_type) = match &entity.kind {
        EntityKind::Class(c) | EntityKind::Interface(c) => {
            (c.base_classes.clone(), Vec::new(), None)
        }
        EntityKind::Function(f) | EntityKind::Task(f) => (
            Vec::new(),
            f.parameters
                .iter()
                .map(|p| match &p.type_annotation {
                    Some(ty) => format!("{}: {ty}", p.name),
                    None => p.name.clone(),
                })
                .collect(),
            f.return_type.clone(),
        ),
        EntityKind::Method(m) => (
            Vec::new(),
            m.parameters
                .iter()
                .map(|p| match &p.type_annotation {
                    Some(ty) => format!("{}: {ty}", p.name),
                    None => p.name.clone(),
                })
                .collect(),
            m.return_type.clone(),
        ),
        _ => (Vec::new(), Vec::new(), None),
    };

    Ok(SymbolRecord {
        id: entity.id.to_string(),
        repository,
        file_path,
        qualified_name: entity.qualified_name.clone(),
        simple_name: entity.name.clone(),
        entity_type: entity.entity_type.as_str().to_string(),
        language: entity.language.clone(),
        line_start: entity.line_start,
        line_end: entity.line_end,
        visibility: entity.visibility.as_str().to_string(),
        is_exported: entity.is_exported,
        signature: entity.signature.clone(),
        docstring: entity.docstring.clone(),
        decorators: entity.decorators.clone(),
        base_classes,
        parameters,
        return_type,
        source_text: if include_source {
            entity.source_text.clone()
        } else {
            None
        },
    })
}
