//! Core data model: entities, relations, repository/file state.
//!
//! Entities form a closed tagged union: a common header struct carries the
//! fields every entity shares, and an [`EntityKind`] payload carries the
//! variant-specific ones. Relations are `(source_id, target_id, kind)`
//! triples; pending references are the unresolved queue the resolver drains
//! into relations.

pub mod entity;
pub mod extraction;
pub mod reference;
pub mod responses;
pub mod state;

pub use entity::{
    CodeEntity, ClassDetail, EntityKind, EntityType, FunctionDetail, ImportDetail, MethodDetail,
    Parameter, VariableDetail, Visibility, build_qualified_name, snake_to_pascal,
};
pub use extraction::{ExtractionResult, ParseDiagnostic, ParseErrorKind, PendingRef, ResolvedRelation};
pub use reference::{PendingReference, ReferenceStatus, Relation, RelationType};
pub use state::{FileStatus, IndexedFile, QueueEntry, Repository, RepositoryStatus};
