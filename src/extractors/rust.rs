//! Rust extractor.
//!
//! Qualified names use `::` separators. `self.method()` calls resolve to
//! the `impl` type. Macro invocations are not calls. Grouped `use` imports
//! expand to one import entity per symbol; aliases are recorded.

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

pub struct RustExtractor {
    parser: Parser,
}

impl RustExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_rust::LANGUAGE.into(), "rust")?;
        Ok(Self { parser })
    }

    fn module_name(path: &Path) -> String {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if stem == "mod" || stem == "lib" {
            path.parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or(stem)
                .to_string()
        } else {
            stem.to_string()
        }
    }

    fn visibility_of(node: Node) -> Visibility {
        match find_child(node, "visibility_modifier") {
            Some(_) => Visibility::Public,
            None => Visibility::Private,
        }
    }

    fn doc_of(node: Node, source: &[u8]) -> Option<String> {
        leading_comment_doc(node, source, &["///", "//!", "//"])
    }

    fn signature_of(node: Node, source: &[u8]) -> String {
        let end = find_child(node, "block")
            .map(|b| b.start_byte())
            .unwrap_or(node.end_byte());
        String::from_utf8_lossy(&source[node.start_byte()..end])
            .trim()
            .to_string()
    }

    // =========================================================================
    // Imports
    // =========================================================================

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        for decl in find_descendants(root, "use_declaration") {
            if let Some(tree) = find_child(decl, "use_tree")
                .or_else(|| decl.child_by_field_name("argument"))
            {
                self.walk_use_tree(tree, String::new(), decl, ctx, result);
            } else {
                // Grammar variants put the path directly under the declaration
                let mut cursor = decl.walk();
                for child in decl.children(&mut cursor) {
                    match child.kind() {
                        "identifier" | "scoped_identifier" | "use_as_clause" | "use_list"
                        | "scoped_use_list" | "use_wildcard" => {
                            self.walk_use_tree(child, String::new(), decl, ctx, result);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Expand a use tree into one import entity per imported symbol.
    fn walk_use_tree(
        &self,
        node: Node,
        prefix: String,
        decl: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        match node.kind() {
            "identifier" | "scoped_identifier" | "crate" | "self" | "super" => {
                let segment = node_text(node, source);
                let path = join_path(&prefix, &segment);
                self.emit_import(&path, None, false, decl, ctx, result);
            }
            "use_as_clause" => {
                let path_node = node.child_by_field_name("path");
                let alias = node
                    .child_by_field_name("alias")
                    .map(|n| node_text(n, source));
                if let Some(p) = path_node {
                    let path = join_path(&prefix, &node_text(p, source));
                    self.emit_import(&path, alias, false, decl, ctx, result);
                }
            }
            "use_wildcard" => {
                let path = if let Some(p) = find_child(node, "scoped_identifier")
                    .or_else(|| find_child(node, "identifier"))
                {
                    join_path(&prefix, &node_text(p, source))
                } else {
                    prefix.clone()
                };
                self.emit_import(&path, None, true, decl, ctx, result);
            }
            "scoped_use_list" => {
                let new_prefix = node
                    .child_by_field_name("path")
                    .map(|p| join_path(&prefix, &node_text(p, source)))
                    .unwrap_or(prefix);
                if let Some(list) = node.child_by_field_name("list") {
                    self.walk_use_tree(list, new_prefix, decl, ctx, result);
                }
            }
            "use_list" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if matches!(
                        child.kind(),
                        "identifier"
                            | "scoped_identifier"
                            | "use_as_clause"
                            | "scoped_use_list"
                            | "use_list"
                            | "use_wildcard"
                            | "self"
                    ) {
                        self.walk_use_tree(child, prefix.clone(), decl, ctx, result);
                    }
                }
            }
            "use_tree" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.walk_use_tree(child, prefix.clone(), decl, ctx, result);
                }
            }
            _ => {}
        }
    }

    fn emit_import(
        &self,
        path: &str,
        alias: Option<String>,
        is_wildcard: bool,
        decl: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        if path.is_empty() {
            return;
        }
        let source = ctx.source;
        let (source_module, symbol) = match path.rsplit_once("::") {
            Some((module, sym)) => (module.to_string(), sym.to_string()),
            None => (path.to_string(), path.to_string()),
        };

        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "rust",
            symbol.clone(),
            path.to_string(),
            line_start(decl),
            line_end(decl),
            EntityKind::Import(ImportDetail {
                source_module,
                imported_symbols: if is_wildcard {
                    vec!["*".to_string()]
                } else {
                    vec![symbol]
                },
                is_wildcard,
                alias,
                ..Default::default()
            }),
        );
        if !is_wildcard {
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: path.to_string(),
                relation_type: RelationType::Imports,
                line_number: Some(line_start(decl)),
                context_snippet: Some(source_line(decl, source)),
                receiver_expr: None,
            });
        }
        result.entities.push(entity);
    }

    // =========================================================================
    // Items
    // =========================================================================

    fn extract_items(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;

        for item in find_descendants(root, "struct_item") {
            self.emit_type(item, ctx, module, false, result);
        }
        for item in find_descendants(root, "enum_item") {
            self.emit_type(item, ctx, module, false, result);
        }
        for item in find_descendants(root, "trait_item") {
            self.emit_type(item, ctx, module, true, result);
        }

        for item in find_descendants(root, "type_item") {
            if let Some(name_node) = item.child_by_field_name("name") {
                let name = node_text(name_node, source);
                let qualified = build_qualified_name(&name, None, Some(module), "::");
                let entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    "rust",
                    name,
                    qualified,
                    line_start(item),
                    line_end(item),
                    EntityKind::TypeAlias,
                )
                .with_source_text(node_text(item, source))
                .with_visibility(Self::visibility_of(item));
                result.entities.push(entity);
            }
        }

        // Free functions: function_item outside any impl block
        for func in find_descendants(root, "function_item") {
            if Self::enclosing_impl(func).is_some() {
                continue;
            }
            self.emit_function(func, ctx, module, None, result);
        }

        // Methods: function_item inside impl blocks, bound to the impl type
        for imp in find_descendants(root, "impl_item") {
            let impl_type = imp
                .child_by_field_name("type")
                .map(|t| Self::type_name(t, source));
            // `impl Trait for Type` contributes an implements reference
            if let (Some(trait_node), Some(type_name)) =
                (imp.child_by_field_name("trait"), impl_type.clone())
            {
                let trait_name = Self::type_name(trait_node, source);
                let type_qualified = build_qualified_name(&type_name, None, Some(module), "::");
                if let Some(type_entity) = result
                    .entities
                    .iter()
                    .find(|e| e.qualified_name == type_qualified)
                {
                    result.pending_references.push(PendingRef {
                        source_entity_id: type_entity.id,
                        source_qualified_name: type_qualified,
                        target_qualified_name: trait_name,
                        relation_type: RelationType::Implements,
                        line_number: Some(line_start(imp)),
                        context_snippet: Some(source_line(imp, source)),
                        receiver_expr: None,
                    });
                }
            }
            if let Some(body) = imp.child_by_field_name("body") {
                for func in find_children(body, "function_item") {
                    self.emit_function(func, ctx, module, impl_type.as_deref(), result);
                }
            }
        }
    }

    fn enclosing_impl(node: Node) -> Option<Node> {
        let mut current = node.parent();
        while let Some(parent) = current {
            if parent.kind() == "impl_item" {
                return Some(parent);
            }
            current = parent.parent();
        }
        None
    }

    fn type_name(node: Node, source: &[u8]) -> String {
        match node.kind() {
            "generic_type" => node
                .child_by_field_name("type")
                .map(|t| node_text(t, source))
                .unwrap_or_else(|| node_text(node, source)),
            _ => node_text(node, source),
        }
    }

    fn emit_type(
        &self,
        item: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        is_trait: bool,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = item.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, None, Some(module), "::");
        let kind = if is_trait {
            EntityKind::Interface(ClassDetail::default())
        } else {
            EntityKind::Class(ClassDetail::default())
        };
        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "rust",
            name,
            qualified,
            line_start(item),
            line_end(item),
            kind,
        )
        .with_docstring(Self::doc_of(item, source))
        .with_source_text(node_text(item, source))
        .with_visibility(Self::visibility_of(item))
        .with_exported(Self::visibility_of(item) == Visibility::Public);
        result.entities.push(entity);
    }

    fn emit_function(
        &self,
        func: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        impl_type: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = func.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);

        let is_async = {
            let mut cursor = func.walk();
            func.children(&mut cursor)
                .any(|c| c.kind() == "function_modifiers" && node_text(c, source).contains("async"))
        };
        let parameters = Self::parameters_of(func, source);
        let return_type = func
            .child_by_field_name("return_type")
            .map(|n| node_text(n, source));

        let (qualified, kind) = match impl_type {
            Some(parent) => {
                let parent_qualified = build_qualified_name(parent, None, Some(module), "::");
                (
                    build_qualified_name(&name, Some(&parent_qualified), None, "::"),
                    EntityKind::Method(MethodDetail {
                        parent_class: parent_qualified,
                        parameters,
                        return_type,
                        is_async,
                        ..Default::default()
                    }),
                )
            }
            None => (
                build_qualified_name(&name, None, Some(module), "::"),
                EntityKind::Function(FunctionDetail {
                    parameters,
                    return_type,
                    is_async,
                    calls: Vec::new(),
                }),
            ),
        };

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "rust",
            name,
            qualified,
            line_start(func),
            line_end(func),
            kind,
        )
        .with_signature(Self::signature_of(func, source))
        .with_docstring(Self::doc_of(func, source))
        .with_source_text(node_text(func, source))
        .with_visibility(Self::visibility_of(func))
        .with_exported(Self::visibility_of(func) == Visibility::Public);

        if let Some(body) = find_child(func, "block") {
            self.extract_calls(body, source, &mut entity, impl_type, result);
        }
        result.entities.push(entity);
    }

    fn parameters_of(func: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(list) = func.child_by_field_name("parameters") else {
            return params;
        };
        for param in find_children(list, "parameter") {
            let name = param
                .child_by_field_name("pattern")
                .map(|n| node_text(n, source))
                .unwrap_or_default();
            let ty = param
                .child_by_field_name("type")
                .map(|n| node_text(n, source));
            params.push(Parameter {
                name,
                type_annotation: ty,
                is_optional: false,
            });
        }
        params
    }

    fn extract_calls(
        &self,
        body: Node,
        source: &[u8],
        entity: &mut CodeEntity,
        impl_type: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let mut seen: Vec<String> = Vec::new();

        // Macro invocations are a different node kind and never reach here.
        for call in find_descendants(body, "call_expression") {
            let Some(func_node) = call.child_by_field_name("function") else {
                continue;
            };
            let (callee, receiver_expr) = match func_node.kind() {
                "identifier" => (node_text(func_node, source), None),
                "scoped_identifier" => (node_text(func_node, source), None),
                "field_expression" => {
                    let value = func_node.child_by_field_name("value");
                    let field = func_node.child_by_field_name("field");
                    let (Some(value), Some(field)) = (value, field) else {
                        continue;
                    };
                    let receiver_text = node_text(value, source);
                    let method = node_text(field, source);
                    if receiver_text == "self" {
                        match impl_type {
                            Some(ty) => (format!("{ty}.{method}"), None),
                            None => (format!("self.{method}"), None),
                        }
                    } else {
                        (
                            format!("{receiver_text}.{method}"),
                            Some(receiver_text),
                        )
                    }
                }
                _ => continue,
            };

            if seen.iter().any(|s| s == &callee) {
                continue;
            }
            seen.push(callee.clone());

            entity.push_call(&callee);
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: callee,
                relation_type: RelationType::Calls,
                line_number: Some(line_start(call)),
                context_snippet: Some(source_line(call, source)),
                receiver_expr,
            });
        }
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}::{segment}")
    }
}

impl Extractor for RustExtractor {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["rs"])
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
        let module = Self::module_name(ctx.file_path);

        self.extract_imports(root, ctx, &mut result);
        self.extract_items(root, ctx, &module, &mut result);

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
        let mut extractor = RustExtractor::new().unwrap();
        let path = Path::new("service.rs");
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    #[test]
    fn test_use_import_single_symbol() {
        let result = extract("use std::collections::HashMap;\n");
        let import = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Import)
            .unwrap();
        assert_eq!(import.qualified_name, "std::collections::HashMap");
        match &import.kind {
            EntityKind::Import(i) => {
                assert_eq!(i.source_module, "std::collections");
                assert_eq!(i.imported_symbols, vec!["HashMap"]);
            }
            other => panic!("expected import, got {other:?}"),
        }

        let import_ref = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Imports)
            .unwrap();
        assert_eq!(
            import_ref.target_qualified_name,
            "std::collections::HashMap"
        );
    }

    #[test]
    fn test_grouped_use_expands_per_symbol() {
        let result = extract("use std::io::{Read, Write};\n");
        let imports: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(imports.len(), 2);
        assert!(imports.iter().any(|e| e.qualified_name == "std::io::Read"));
        assert!(imports.iter().any(|e| e.qualified_name == "std::io::Write"));
    }

    #[test]
    fn test_aliased_use_records_alias() {
        let result = extract("use std::collections::HashMap as Map;\n");
        let import = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Import)
            .unwrap();
        match &import.kind {
            EntityKind::Import(i) => assert_eq!(i.alias.as_deref(), Some("Map")),
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_self_call_resolves_to_impl_type() {
        let code = r#"
struct MyService {
    value: i32,
}

impl MyService {
    fn run(&self) {
        self.helper();
    }

    fn helper(&self) {}
}
"#;
        let result = extract(code);
        let run = result
            .entities
            .iter()
            .find(|e| e.name == "run")
            .unwrap();
        assert_eq!(run.qualified_name, "service::MyService::run");
        match &run.kind {
            EntityKind::Method(m) => {
                assert!(m.calls.contains(&"MyService.helper".to_string()));
            }
            other => panic!("expected method, got {other:?}"),
        }

        let call_refs: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Calls)
            .collect();
        assert!(
            call_refs
                .iter()
                .any(|r| r.target_qualified_name == "MyService.helper")
        );
        assert!(call_refs.iter().all(|r| r.receiver_expr.is_none()));
    }

    #[test]
    fn test_scoped_call_captured() {
        let code = r#"
fn create() {
    let v = Vec::new();
}
"#;
        let result = extract(code);
        let func = result.entities.iter().find(|e| e.name == "create").unwrap();
        match &func.kind {
            EntityKind::Function(f) => assert_eq!(f.calls, vec!["Vec::new"]),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_macros_are_not_calls() {
        let code = r#"
fn greet() {
    println!("Hello");
}
"#;
        let result = extract(code);
        let func = result.entities.iter().find(|e| e.name == "greet").unwrap();
        match &func.kind {
            EntityKind::Function(f) => assert!(f.calls.is_empty()),
            other => panic!("expected function, got {other:?}"),
        }
        assert!(
            result
                .pending_references
                .iter()
                .all(|r| r.relation_type != RelationType::Calls)
        );
    }

    #[test]
    fn test_trait_and_impl_trait_reference() {
        let code = r#"
pub trait Runner {
    fn run(&self);
}

pub struct Worker;

impl Runner for Worker {
    fn run(&self) {}
}
"#;
        let result = extract(code);
        let trait_entity = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Interface)
            .unwrap();
        assert_eq!(trait_entity.qualified_name, "service::Runner");

        let implements: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Implements)
            .collect();
        assert_eq!(implements.len(), 1);
        assert_eq!(implements[0].target_qualified_name, "Runner");
        assert_eq!(implements[0].source_qualified_name, "service::Worker");
    }

    #[test]
    fn test_doc_comments_captured() {
        let code = r#"
/// Does important work.
pub fn work() {}
"#;
        let result = extract(code);
        let func = result.entities.iter().find(|e| e.name == "work").unwrap();
        assert_eq!(func.docstring.as_deref(), Some("Does important work."));
        assert!(func.is_exported);
    }

    #[test]
    fn test_duplicate_calls_collapse() {
        let code = r#"
fn process() {
    helper();
    helper();
    helper();
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
