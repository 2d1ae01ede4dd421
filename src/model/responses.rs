//! Typed responses returned by the tool surface.

use serde::{Deserialize, Serialize};

/// One hit from semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub repository: String,
    pub file_path: String,
    pub qualified_name: String,
    pub simple_name: String,
    pub entity_type: String,
    pub line_start: u32,
    pub line_end: u32,
    /// Similarity score in [0, 1]
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Full symbol record returned by `find_symbol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: String,
    pub repository: String,
    pub file_path: String,
    pub qualified_name: String,
    pub simple_name: String,
    pub entity_type: String,
    pub language: String,
    pub line_start: u32,
    pub line_end: u32,
    pub visibility: String,
    pub is_exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolResponse {
    pub qualified_name: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SymbolRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One reference edge in a references/usages response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub file_path: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub relation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesResponse {
    pub qualified_name: String,
    pub incoming_count: usize,
    pub outgoing_count: usize,
    pub references: Vec<ReferenceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-repository indexing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStatusItem {
    pub name: String,
    pub status: String,
    pub file_count: u64,
    pub entity_count: u64,
    pub relation_count: u64,
    pub pending_files: u64,
    pub failed_files: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatusResponse {
    pub repositories: Vec<RepositoryStatusItem>,
    pub queue_length: u64,
    pub is_writer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexResponse {
    pub repository: String,
    pub status: String,
    pub files_queued: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
