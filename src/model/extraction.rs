//! Extraction output: what an extractor hands back to the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::CodeEntity;
use super::reference::RelationType;

/// Classification of a parse diagnostic collected from a syntax tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    Error,
    Missing,
}

/// Location of an ERROR or MISSING node in the parsed tree (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub line: u32,
    pub column: u32,
    pub kind: ParseErrorKind,
}

/// A relation already resolved at extraction time (both endpoints are
/// entities emitted by this same file).
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_type: RelationType,
    pub line_number: Option<u32>,
    pub context_snippet: Option<String>,
    pub weight: f64,
}

/// A reference the extractor could not resolve; the resolver binds it to a
/// concrete target later.
#[derive(Debug, Clone)]
pub struct PendingRef {
    pub source_entity_id: Uuid,
    pub source_qualified_name: String,
    pub target_qualified_name: String,
    pub relation_type: RelationType,
    pub line_number: Option<u32>,
    pub context_snippet: Option<String>,
    pub receiver_expr: Option<String>,
}

/// Everything one extractor pass produces for one file.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub entities: Vec<CodeEntity>,
    pub relations: Vec<ResolvedRelation>,
    pub pending_references: Vec<PendingRef>,
    pub parse_errors: Vec<ParseDiagnostic>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}
