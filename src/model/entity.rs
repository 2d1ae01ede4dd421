//! Code entity model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of entity types the index recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Module,
    Class,
    Interface,
    Function,
    Method,
    Variable,
    Import,
    Task,
    TypeAlias,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Function => "function",
            Self::Method => "method",
            Self::Variable => "variable",
            Self::Import => "import",
            Self::Task => "task",
            Self::TypeAlias => "type_alias",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(Self::Module),
            "class" => Some(Self::Class),
            "interface" => Some(Self::Interface),
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "variable" => Some(Self::Variable),
            "import" => Some(Self::Import),
            "task" => Some(Self::Task),
            "type_alias" => Some(Self::TypeAlias),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "private" => Self::Private,
            "protected" => Self::Protected,
            _ => Self::Public,
        }
    }
}

/// A function or method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
    #[serde(default)]
    pub is_optional: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_annotation: None,
            is_optional: false,
        }
    }

    pub fn typed(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_annotation: Some(ty.into()),
            is_optional: false,
        }
    }
}

/// Class/interface payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassDetail {
    #[serde(default)]
    pub base_classes: Vec<String>,
    #[serde(default)]
    pub mixins: Vec<String>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub method_names: Vec<String>,
}

/// Function payload. Observed callee names in `calls` are display data only;
/// the resolvable edges are the pending references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionDetail {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub calls: Vec<String>,
}

/// Method payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodDetail {
    pub parent_class: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_constructor: bool,
    #[serde(default)]
    pub is_property: bool,
    #[serde(default)]
    pub is_classmethod: bool,
    #[serde(default)]
    pub calls: Vec<String>,
}

/// Variable payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableDetail {
    #[serde(default)]
    pub is_constant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// Import payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportDetail {
    pub source_module: String,
    #[serde(default)]
    pub imported_symbols: Vec<String>,
    #[serde(default)]
    pub is_relative: bool,
    #[serde(default)]
    pub is_wildcard: bool,
    #[serde(default)]
    pub relative_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Variant-specific payload of a [`CodeEntity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Class(ClassDetail),
    Interface(ClassDetail),
    Function(FunctionDetail),
    Method(MethodDetail),
    Variable(VariableDetail),
    Import(ImportDetail),
    Task(FunctionDetail),
    TypeAlias,
}

impl EntityKind {
    /// The entity type this payload implies.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Module => EntityType::Module,
            Self::Class(_) => EntityType::Class,
            Self::Interface(_) => EntityType::Interface,
            Self::Function(_) => EntityType::Function,
            Self::Method(_) => EntityType::Method,
            Self::Variable(_) => EntityType::Variable,
            Self::Import(_) => EntityType::Import,
            Self::Task(_) => EntityType::Task,
            Self::TypeAlias => EntityType::TypeAlias,
        }
    }
}

/// A single extracted code entity: shared header plus variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub file_id: Uuid,
    /// Simple name (last segment of the qualified name)
    pub name: String,
    /// Module-prefixed path uniquely identifying the entity in a repository
    pub qualified_name: String,
    pub entity_type: EntityType,
    pub language: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<Uuid>,
    pub kind: EntityKind,
}

impl CodeEntity {
    /// Create an entity with a fresh id; the entity type is derived from the
    /// payload.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository_id: Uuid,
        file_id: Uuid,
        language: impl Into<String>,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        line_start: u32,
        line_end: u32,
        kind: EntityKind,
    ) -> Self {
        let entity_type = kind.entity_type();
        Self {
            id: Uuid::new_v4(),
            repository_id,
            file_id,
            name: name.into(),
            qualified_name: qualified_name.into(),
            entity_type,
            language: language.into(),
            line_start,
            line_end,
            col_start: None,
            col_end: None,
            signature: None,
            docstring: None,
            source_text: None,
            visibility: Visibility::Public,
            is_exported: false,
            decorators: Vec::new(),
            vector_id: None,
            kind,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_docstring(mut self, docstring: Option<String>) -> Self {
        self.docstring = docstring;
        self
    }

    pub fn with_source_text(mut self, source_text: impl Into<String>) -> Self {
        self.source_text = Some(source_text.into());
        self
    }

    pub fn with_decorators(mut self, decorators: Vec<String>) -> Self {
        self.decorators = decorators;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_exported(mut self, is_exported: bool) -> Self {
        self.is_exported = is_exported;
        self
    }

    /// Record an observed callee name on a function/method/task payload.
    pub fn push_call(&mut self, callee: &str) {
        match &mut self.kind {
            EntityKind::Function(f) | EntityKind::Task(f) => f.calls.push(callee.to_string()),
            EntityKind::Method(m) => m.calls.push(callee.to_string()),
            _ => {}
        }
    }
}

/// Build a fully qualified name from its non-empty parts.
///
/// The single builder used by every extractor. A parent that already carries
/// the module prefix is not re-prefixed, so `build("f", Some("m.C"), Some("m"),
/// ".")` yields `m.C.f`, never `m.m.C.f`.
pub fn build_qualified_name(
    name: &str,
    parent: Option<&str>,
    module: Option<&str>,
    separator: &str,
) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(3);

    match (module, parent) {
        (Some(m), Some(p)) if !m.is_empty() && !p.is_empty() => {
            if p == m || p.starts_with(&format!("{m}{separator}")) {
                parts.push(p);
            } else {
                parts.push(m);
                parts.push(p);
            }
        }
        (Some(m), _) if !m.is_empty() => parts.push(m),
        (_, Some(p)) if !p.is_empty() => parts.push(p),
        _ => {}
    }
    parts.push(name);
    parts.join(separator)
}

/// Convert a snake_case identifier to PascalCase (`chart_writer` → `ChartWriter`).
pub fn snake_to_pascal(s: &str) -> String {
    s.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_simple() {
        assert_eq!(build_qualified_name("f", None, Some("m"), "."), "m.f");
        assert_eq!(build_qualified_name("f", None, None, "."), "f");
    }

    #[test]
    fn test_qualified_name_with_parent() {
        assert_eq!(
            build_qualified_name("run", Some("Service"), Some("m"), "."),
            "m.Service.run"
        );
    }

    #[test]
    fn test_qualified_name_never_duplicates_module() {
        // Parent already carries the module prefix
        assert_eq!(
            build_qualified_name("run", Some("m.Service"), Some("m"), "."),
            "m.Service.run"
        );
        // Rust separator
        assert_eq!(
            build_qualified_name("new", Some("m::Service"), Some("m"), "::"),
            "m::Service::new"
        );
    }

    #[test]
    fn test_qualified_name_contains_module_once() {
        let qn = build_qualified_name("f", None, Some("m"), ".");
        assert_eq!(qn.matches("m.").count(), 1);
        assert_ne!(qn, "m.m.f");
    }

    #[test]
    fn test_snake_to_pascal() {
        assert_eq!(snake_to_pascal("chart_writer"), "ChartWriter");
        assert_eq!(snake_to_pascal("redis"), "Redis");
        assert_eq!(snake_to_pascal("a_b_c"), "ABC");
        assert_eq!(snake_to_pascal(""), "");
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for ty in [
            EntityType::Module,
            EntityType::Class,
            EntityType::Interface,
            EntityType::Function,
            EntityType::Method,
            EntityType::Variable,
            EntityType::Import,
            EntityType::Task,
            EntityType::TypeAlias,
        ] {
            assert_eq!(EntityType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EntityType::parse("package"), None);
    }

    #[test]
    fn test_push_call_targets_payload() {
        let mut entity = CodeEntity::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "python",
            "run",
            "m.Service.run",
            1,
            3,
            EntityKind::Method(MethodDetail {
                parent_class: "m.Service".to_string(),
                ..Default::default()
            }),
        );
        entity.push_call("Service.helper");
        match &entity.kind {
            EntityKind::Method(m) => assert_eq!(m.calls, vec!["Service.helper"]),
            _ => panic!("expected method payload"),
        }
    }
}
