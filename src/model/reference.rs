//! Relations and pending references.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::EntityType;

/// The kinds of edges stored between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Imports,
    Extends,
    Implements,
    Calls,
    Instantiates,
    References,
    UsesType,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imports => "imports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Calls => "calls",
            Self::Instantiates => "instantiates",
            Self::References => "references",
            Self::UsesType => "uses_type",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imports" => Some(Self::Imports),
            "extends" => Some(Self::Extends),
            "implements" => Some(Self::Implements),
            "calls" => Some(Self::Calls),
            "instantiates" => Some(Self::Instantiates),
            "references" => Some(Self::References),
            "uses_type" => Some(Self::UsesType),
            _ => None,
        }
    }

    /// Entity types preferred as the target of this relation kind, used by
    /// the resolver's disambiguation tiers. `None` means no preference.
    pub fn preferred_targets(&self) -> Option<&'static [EntityType]> {
        match self {
            Self::Extends => Some(&[EntityType::Class, EntityType::Interface]),
            Self::Implements => Some(&[EntityType::Interface]),
            Self::Calls => Some(&[EntityType::Function, EntityType::Method]),
            Self::Imports => Some(&[
                EntityType::Module,
                EntityType::Class,
                EntityType::Function,
            ]),
            Self::Instantiates => Some(&[EntityType::Class]),
            Self::UsesType => Some(&[
                EntityType::Class,
                EntityType::TypeAlias,
                EntityType::Interface,
            ]),
            Self::References => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a pending reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Pending,
    Resolved,
    Unresolved,
}

impl ReferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

/// A resolved edge between two materialized entities. Source/target fields
/// are denormalized so reference queries avoid entity joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub source_id: Uuid,
    pub source_qualified_name: String,
    pub source_entity_type: EntityType,
    pub source_repository_id: Uuid,
    pub target_id: Uuid,
    pub target_qualified_name: String,
    pub target_entity_type: EntityType,
    pub target_repository_id: Uuid,
    pub relation_type: RelationType,
    pub is_cross_repository: bool,
    pub line_number: Option<u32>,
    pub context_snippet: Option<String>,
    pub weight: f64,
}

/// An unresolved edge whose target is still a name pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReference {
    pub id: Uuid,
    pub source_entity_id: Uuid,
    pub source_qualified_name: String,
    pub source_repository_id: Uuid,
    pub target_qualified_name: String,
    pub relation_type: RelationType,
    pub status: ReferenceStatus,
    pub attempts: u32,
    pub resolved_target_id: Option<Uuid>,
    pub line_number: Option<u32>,
    pub context_snippet: Option<String>,
    /// Textual object expression preceding a dotted call (`ctx.redis` for
    /// `ctx.redis.get(...)`); `None` for unqualified or self-bound calls.
    pub receiver_expr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_roundtrip() {
        for ty in [
            RelationType::Imports,
            RelationType::Extends,
            RelationType::Implements,
            RelationType::Calls,
            RelationType::Instantiates,
            RelationType::References,
            RelationType::UsesType,
        ] {
            assert_eq!(RelationType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn test_preferred_targets() {
        assert_eq!(
            RelationType::Extends.preferred_targets(),
            Some(&[EntityType::Class, EntityType::Interface][..])
        );
        assert!(RelationType::References.preferred_targets().is_none());
    }
}
