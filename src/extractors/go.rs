//! Go extractor.
//!
//! Module name comes from the `package` clause. Methods bind to their
//! receiver type with the pointer stripped. Go builtins are excluded from
//! call extraction.

use std::path::Path;

use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{
    ClassDetail, CodeEntity, EntityKind, ExtractionResult, FunctionDetail, ImportDetail,
    MethodDetail, Parameter, PendingRef, RelationType, Visibility, build_qualified_name,
};

use super::treesitter::{
    collect_parse_errors, find_child, find_children, find_descendants, leading_comment_doc,
    line_end, line_start, new_parser, node_text, source_line,
};
use super::{ExtractionContext, Extractor, has_extension};

const SKIP_NAMES: &[&str] = &[
    "len", "cap", "make", "new", "append", "copy", "delete", "close", "panic", "recover",
];

pub struct GoExtractor {
    parser: Parser,
}

impl GoExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_go::LANGUAGE.into(), "go")?;
        Ok(Self { parser })
    }

    fn package_name(root: Node, source: &[u8]) -> String {
        find_child(root, "package_clause")
            .and_then(|clause| find_child(clause, "package_identifier"))
            .map(|n| node_text(n, source))
            .unwrap_or_else(|| "main".to_string())
    }

    fn is_exported(name: &str) -> bool {
        name.chars().next().is_some_and(char::is_uppercase)
    }

    fn visibility_of(name: &str) -> Visibility {
        if Self::is_exported(name) {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    fn signature_of(node: Node, source: &[u8]) -> String {
        let end = find_child(node, "block")
            .map(|b| b.start_byte())
            .unwrap_or(node.end_byte());
        String::from_utf8_lossy(&source[node.start_byte()..end])
            .trim()
            .to_string()
    }

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for decl in find_children(root, "import_declaration") {
            for spec in find_descendants(decl, "import_spec") {
                let Some(path_node) = find_child(spec, "interpreted_string_literal") else {
                    continue;
                };
                let import_path = node_text(path_node, source)
                    .trim_matches('"')
                    .to_string();
                let simple = import_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&import_path)
                    .to_string();
                let alias = find_child(spec, "package_identifier").map(|n| node_text(n, source));

                let entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    "go",
                    simple.clone(),
                    import_path.clone(),
                    line_start(spec),
                    line_end(spec),
                    EntityKind::Import(ImportDetail {
                        source_module: import_path.clone(),
                        imported_symbols: vec![simple],
                        alias,
                        ..Default::default()
                    }),
                );
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: import_path,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(spec)),
                    context_snippet: Some(source_line(spec, source)),
                    receiver_expr: None,
                });
                result.entities.push(entity);
            }
        }
    }

    fn extract_types(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        package: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for decl in find_children(root, "type_declaration") {
            for spec in find_children(decl, "type_spec") {
                let Some(name_node) = find_child(spec, "type_identifier") else {
                    continue;
                };
                let name = node_text(name_node, source);
                let Some(type_node) = spec.child_by_field_name("type") else {
                    continue;
                };

                let kind = match type_node.kind() {
                    "struct_type" => EntityKind::Class(ClassDetail::default()),
                    "interface_type" => EntityKind::Interface(ClassDetail::default()),
                    _ => continue,
                };

                let qualified = build_qualified_name(&name, None, Some(package), ".");
                let docstring = leading_comment_doc(decl, source, &["//"]);
                let entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    "go",
                    name.clone(),
                    qualified,
                    line_start(decl),
                    line_end(decl),
                    kind,
                )
                .with_docstring(docstring)
                .with_source_text(node_text(decl, source))
                .with_visibility(Self::visibility_of(&name))
                .with_exported(Self::is_exported(&name));
                result.entities.push(entity);
            }
        }
    }

    fn extract_functions(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        package: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;

        for func in find_children(root, "function_declaration") {
            let Some(name_node) = func.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, Some(package), ".");

            let mut entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "go",
                name.clone(),
                qualified,
                line_start(func),
                line_end(func),
                EntityKind::Function(FunctionDetail {
                    parameters: Self::parameters_of(func, source),
                    return_type: Self::return_type_of(func, source),
                    is_async: false,
                    calls: Vec::new(),
                }),
            )
            .with_signature(Self::signature_of(func, source))
            .with_docstring(leading_comment_doc(func, source, &["//"]))
            .with_source_text(node_text(func, source))
            .with_visibility(Self::visibility_of(&name))
            .with_exported(Self::is_exported(&name));

            if let Some(body) = find_child(func, "block") {
                self.extract_calls(body, source, &mut entity, result);
            }
            result.entities.push(entity);
        }

        for method in find_children(root, "method_declaration") {
            let Some(name_node) = method.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            let receiver_type = Self::receiver_type(method, source);
            let parent_class = receiver_type
                .as_deref()
                .map(|t| build_qualified_name(t, None, Some(package), "."))
                .unwrap_or_else(|| package.to_string());
            let qualified = build_qualified_name(&name, Some(&parent_class), None, ".");

            let mut entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "go",
                name.clone(),
                qualified,
                line_start(method),
                line_end(method),
                EntityKind::Method(MethodDetail {
                    parent_class,
                    parameters: Self::parameters_of(method, source),
                    return_type: Self::return_type_of(method, source),
                    ..Default::default()
                }),
            )
            .with_signature(Self::signature_of(method, source))
            .with_docstring(leading_comment_doc(method, source, &["//"]))
            .with_source_text(node_text(method, source))
            .with_visibility(Self::visibility_of(&name))
            .with_exported(Self::is_exported(&name));

            if let Some(body) = find_child(method, "block") {
                self.extract_calls(body, source, &mut entity, result);
            }
            result.entities.push(entity);
        }
    }

    /// Receiver type name with any pointer stripped (`*T` and `T` both
    /// bind to `T`).
    fn receiver_type(method: Node, source: &[u8]) -> Option<String> {
        let receiver = method.child_by_field_name("receiver")?;
        let decl = find_child(receiver, "parameter_declaration")?;
        let type_node = decl.child_by_field_name("type")?;
        let inner = if type_node.kind() == "pointer_type" {
            find_child(type_node, "type_identifier")?
        } else {
            type_node
        };
        Some(node_text(inner, source))
    }

    fn parameters_of(func: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(list) = func.child_by_field_name("parameters") else {
            return params;
        };
        for decl in find_children(list, "parameter_declaration") {
            let ty = decl
                .child_by_field_name("type")
                .map(|n| node_text(n, source));
            let names = find_children(decl, "identifier");
            if names.is_empty() {
                if let Some(ty) = ty {
                    params.push(Parameter {
                        name: String::new(),
                        type_annotation: Some(ty),
                        is_optional: false,
                    });
                }
            } else {
                for name in names {
                    params.push(Parameter {
                        name: node_text(name, source),
                        type_annotation: ty.clone(),
                        is_optional: false,
                    });
                }
            }
        }
        params
    }

    fn return_type_of(func: Node, source: &[u8]) -> Option<String> {
        func.child_by_field_name("result")
            .map(|n| node_text(n, source))
    }

    fn extract_calls(
        &self,
        body: Node,
        source: &[u8],
        entity: &mut CodeEntity,
        result: &mut ExtractionResult,
    ) {
        let mut seen: Vec<String> = Vec::new();

        for call in find_descendants(body, "call_expression") {
            let Some(func_node) = call.child_by_field_name("function") else {
                continue;
            };
            let (callee, receiver_expr) = match func_node.kind() {
                "identifier" => (node_text(func_node, source), None),
                "selector_expression" => {
                    let full = node_text(func_node, source);
                    let receiver = full
                        .rsplit_once('.')
                        .map(|(prefix, _)| prefix.to_string());
                    (full, receiver)
                }
                _ => continue,
            };

            let simple = callee.rsplit('.').next().unwrap_or(&callee);
            if SKIP_NAMES.contains(&simple) || seen.iter().any(|s| s == &callee) {
                continue;
            }
            seen.push(callee.clone());

            let relation_type = if simple.chars().next().is_some_and(char::is_uppercase)
                && receiver_expr.is_none()
            {
                RelationType::Instantiates
            } else {
                RelationType::Calls
            };

            entity.push_call(&callee);
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: callee,
                relation_type,
                line_number: Some(line_start(call)),
                context_snippet: Some(source_line(call, source)),
                receiver_expr,
            });
        }
    }
}

impl Extractor for GoExtractor {
    fn language(&self) -> &'static str {
        "go"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["go"])
    }

    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError> {
        let tree = self
            .parser
            .parse(ctx.source, None)
            .ok_or_else(|| ExtractError::ParseFailed {
                path: ctx.file_path.to_path_buf(),
            })?;
        let root = tree.root_node();
        let mut result = ExtractionResult::new();
        let package = Self::package_name(root, ctx.source);

        self.extract_imports(root, ctx, &mut result);
        self.extract_types(root, ctx, &package, &mut result);
        self.extract_functions(root, ctx, &package, &mut result);

        if root.has_error() {
            result.parse_errors = collect_parse_errors(root);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    fn extract(code: &str) -> ExtractionResult {
        let mut extractor = GoExtractor::new().unwrap();
        let path = Path::new("main.go");
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    #[test]
    fn test_package_qualified_call() {
        let code = r#"package main

import "strings"

func check(s string) bool {
    return strings.Contains(s, "hello")
}
"#;
        let result = extract(code);

        let func = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Function)
            .unwrap();
        assert_eq!(func.qualified_name, "main.check");
        match &func.kind {
            EntityKind::Function(f) => assert_eq!(f.calls, vec!["strings.Contains"]),
            other => panic!("expected function, got {other:?}"),
        }

        let call = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Calls)
            .unwrap();
        assert_eq!(call.target_qualified_name, "strings.Contains");
        assert_eq!(call.receiver_expr.as_deref(), Some("strings"));
    }

    #[test]
    fn test_builtins_skipped() {
        let code = r#"package main

func process() {
    s := make([]int, 10)
    n := len(s)
    _ = n
}
"#;
        let result = extract(code);
        let calls: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Calls)
            .collect();
        assert!(calls.is_empty());
    }

    #[test]
    fn test_method_binds_to_receiver_with_pointer_stripped() {
        let code = r#"package main

type Service struct{}

// Run starts the service.
func (s *Service) Run() {
    initialize()
}
"#;
        let result = extract(code);

        let class = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Class)
            .unwrap();
        assert_eq!(class.qualified_name, "main.Service");

        let method = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Method)
            .unwrap();
        assert_eq!(method.qualified_name, "main.Service.Run");
        assert_eq!(method.docstring.as_deref(), Some("Run starts the service."));
        assert!(method.is_exported);
        match &method.kind {
            EntityKind::Method(m) => assert_eq!(m.parent_class, "main.Service"),
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn test_imports_emit_entity_and_reference() {
        let code = r#"package main

import (
    "fmt"
    "net/http"
)
"#;
        let result = extract(code);
        let imports: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(imports.len(), 2);

        let http = imports
            .iter()
            .find(|e| e.qualified_name == "net/http")
            .unwrap();
        assert_eq!(http.name, "http");

        let refs: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Imports)
            .collect();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_interface_and_visibility() {
        let code = r#"package main

type Runner interface {
    Run()
}

func internalHelper() {}
"#;
        let result = extract(code);
        let iface = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Interface)
            .unwrap();
        assert_eq!(iface.name, "Runner");
        assert!(iface.is_exported);

        let helper = result
            .entities
            .iter()
            .find(|e| e.name == "internalHelper")
            .unwrap();
        assert!(!helper.is_exported);
        assert_eq!(helper.visibility, Visibility::Private);
    }

    #[test]
    fn test_duplicate_calls_collapse() {
        let code = r#"package main

func process() {
    helper()
    helper()
    helper()
}
"#;
        let result = extract(code);
        let calls: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Calls)
            .collect();
        assert_eq!(calls.len(), 1);
    }
}
