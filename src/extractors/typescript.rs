//! TypeScript extractor.
//!
//! Classes, interfaces (stored as abstract-class variants), functions,
//! arrow functions bound to `let`/`const`, imports, and type aliases.
//! Interface extends chains are tracked as pending references.

use std::path::Path;

use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{
    ClassDetail, CodeEntity, EntityKind, ExtractionResult, FunctionDetail, ImportDetail,
    MethodDetail, Parameter, PendingRef, RelationType, build_qualified_name,
};

use super::treesitter::{
    collect_parse_errors, find_child, find_children, find_descendants, line_end, line_start,
    new_parser, node_text, source_line, strip_block_comment,
};
use super::{ExtractionContext, Extractor, has_extension};

const SKIP_NAMES: &[&str] = &[
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "setImmediate",
    "require",
];

pub struct TypeScriptExtractor {
    parser: Parser,
}

impl TypeScriptExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(
            &tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            "typescript",
        )?;
        Ok(Self { parser })
    }

    fn module_name(path: &Path) -> String {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    fn jsdoc_of(node: Node, source: &[u8]) -> Option<String> {
        let target = match node.parent() {
            Some(parent) if parent.kind() == "export_statement" => parent,
            _ => node,
        };
        let sibling = target.prev_sibling()?;
        if sibling.kind() == "comment" {
            let text = node_text(sibling, source);
            if text.starts_with("/**") {
                let doc = strip_block_comment(&text);
                return if doc.is_empty() { None } else { Some(doc) };
            }
        }
        None
    }

    fn is_exported(node: Node) -> bool {
        node.parent()
            .is_some_and(|p| p.kind() == "export_statement")
    }

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for imp in find_children(root, "import_statement") {
            let Some(source_node) = imp.child_by_field_name("source") else {
                continue;
            };
            let module = node_text(source_node, source)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            let is_relative = module.starts_with('.');

            let mut symbols = Vec::new();
            let mut is_wildcard = false;
            let mut alias = None;
            if let Some(clause) = find_child(imp, "import_clause") {
                if let Some(named) = find_child(clause, "named_imports") {
                    for spec in find_children(named, "import_specifier") {
                        if let Some(name) = spec.child_by_field_name("name") {
                            symbols.push(node_text(name, source));
                        }
                        if let Some(a) = spec.child_by_field_name("alias") {
                            alias = Some(node_text(a, source));
                        }
                    }
                }
                if let Some(ns) = find_child(clause, "namespace_import") {
                    is_wildcard = true;
                    if let Some(name) = find_child(ns, "identifier") {
                        alias = Some(node_text(name, source));
                    }
                }
                if let Some(default) = find_child(clause, "identifier") {
                    symbols.push(node_text(default, source));
                }
            }

            let name = symbols
                .first()
                .cloned()
                .unwrap_or_else(|| module.rsplit('/').next().unwrap_or(&module).to_string());
            let qualified = match symbols.first() {
                Some(sym) => format!("{module}.{sym}"),
                None => module.clone(),
            };

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                self.language(),
                name,
                qualified,
                line_start(imp),
                line_end(imp),
                EntityKind::Import(ImportDetail {
                    source_module: module.clone(),
                    imported_symbols: symbols.clone(),
                    is_relative,
                    is_wildcard,
                    alias,
                    ..Default::default()
                }),
            );
            for sym in &symbols {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: format!("{module}.{sym}"),
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(imp)),
                    context_snippet: Some(source_line(imp, source)),
                    receiver_expr: None,
                });
            }
            if symbols.is_empty() {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: module,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(imp)),
                    context_snippet: Some(source_line(imp, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);
        }
    }

    fn extract_classes(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let mut classes = find_descendants(root, "class_declaration");
        classes.extend(find_descendants(root, "abstract_class_declaration"));

        for class in classes {
            let Some(name_node) = class.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, Some(module), ".");
            let is_abstract = class.kind() == "abstract_class_declaration";

            let mut bases = Vec::new();
            let mut interfaces = Vec::new();
            if let Some(heritage) = find_child(class, "class_heritage") {
                if let Some(extends) = find_child(heritage, "extends_clause") {
                    for id in find_descendants(extends, "identifier") {
                        bases.push(node_text(id, source));
                    }
                }
                if let Some(implements) = find_child(heritage, "implements_clause") {
                    for ty in find_descendants(implements, "type_identifier") {
                        interfaces.push(node_text(ty, source));
                    }
                }
            }

            let mut method_names = Vec::new();
            if let Some(body) = class.child_by_field_name("body") {
                for method in find_children(body, "method_definition") {
                    if let Some(n) = method.child_by_field_name("name") {
                        method_names.push(node_text(n, source));
                    }
                }
            }

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                self.language(),
                name,
                qualified.clone(),
                line_start(class),
                line_end(class),
                EntityKind::Class(ClassDetail {
                    base_classes: bases.clone(),
                    mixins: Vec::new(),
                    is_abstract,
                    method_names,
                }),
            )
            .with_docstring(Self::jsdoc_of(class, source))
            .with_source_text(node_text(class, source))
            .with_exported(Self::is_exported(class));

            for base in &bases {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: base.clone(),
                    relation_type: RelationType::Extends,
                    line_number: Some(line_start(class)),
                    context_snippet: Some(source_line(class, source)),
                    receiver_expr: None,
                });
            }
            for iface in &interfaces {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: iface.clone(),
                    relation_type: RelationType::Implements,
                    line_number: Some(line_start(class)),
                    context_snippet: Some(source_line(class, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);

            if let Some(body) = class.child_by_field_name("body") {
                for method in find_children(body, "method_definition") {
                    self.extract_method(method, ctx, &qualified, result);
                }
            }
        }

        // Interfaces are stored as abstract-class variants
        for iface in find_descendants(root, "interface_declaration") {
            let Some(name_node) = iface.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, Some(module), ".");

            let mut bases = Vec::new();
            for clause in ["extends_clause", "extends_type_clause"] {
                for extends in find_descendants(iface, clause) {
                    for ty in find_descendants(extends, "type_identifier") {
                        bases.push(node_text(ty, source));
                    }
                    for id in find_descendants(extends, "identifier") {
                        bases.push(node_text(id, source));
                    }
                }
            }

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                self.language(),
                name,
                qualified.clone(),
                line_start(iface),
                line_end(iface),
                EntityKind::Class(ClassDetail {
                    base_classes: bases.clone(),
                    mixins: Vec::new(),
                    is_abstract: true,
                    method_names: Vec::new(),
                }),
            )
            .with_docstring(Self::jsdoc_of(iface, source))
            .with_source_text(node_text(iface, source))
            .with_exported(Self::is_exported(iface));

            for base in &bases {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: base.clone(),
                    relation_type: RelationType::Extends,
                    line_number: Some(line_start(iface)),
                    context_snippet: Some(source_line(iface, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);
        }

        for alias in find_descendants(root, "type_alias_declaration") {
            if let Some(name_node) = alias.child_by_field_name("name") {
                let name = node_text(name_node, source);
                let qualified = build_qualified_name(&name, None, Some(module), ".");
                let entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    self.language(),
                    name,
                    qualified,
                    line_start(alias),
                    line_end(alias),
                    EntityKind::TypeAlias,
                )
                .with_source_text(node_text(alias, source))
                .with_exported(Self::is_exported(alias));
                result.entities.push(entity);
            }
        }
    }

    fn extract_method(
        &self,
        method: Node,
        ctx: &ExtractionContext<'_>,
        parent_class: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = method.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, Some(parent_class), None, ".");

        let is_async = {
            let mut cursor = method.walk();
            method.children(&mut cursor).any(|c| c.kind() == "async")
        };
        let is_static = {
            let mut cursor = method.walk();
            method.children(&mut cursor).any(|c| c.kind() == "static")
        };

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            self.language(),
            name.clone(),
            qualified,
            line_start(method),
            line_end(method),
            EntityKind::Method(MethodDetail {
                parent_class: parent_class.to_string(),
                parameters: Self::parameters_of(method, source),
                return_type: method
                    .child_by_field_name("return_type")
                    .map(|n| node_text(n, source).trim_start_matches(':').trim().to_string()),
                is_async,
                is_static,
                is_constructor: name == "constructor",
                ..Default::default()
            }),
        )
        .with_docstring(Self::jsdoc_of(method, source))
        .with_source_text(node_text(method, source));

        if let Some(body) = method.child_by_field_name("body") {
            self.extract_calls(body, source, &mut entity, Some(parent_class), result);
        }
        result.entities.push(entity);
    }

    fn extract_functions(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;

        for func in find_descendants(root, "function_declaration") {
            let Some(name_node) = func.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, Some(module), ".");
            let is_async = {
                let mut cursor = func.walk();
                func.children(&mut cursor).any(|c| c.kind() == "async")
            };

            let mut entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                self.language(),
                name,
                qualified,
                line_start(func),
                line_end(func),
                EntityKind::Function(FunctionDetail {
                    parameters: Self::parameters_of(func, source),
                    return_type: func
                        .child_by_field_name("return_type")
                        .map(|n| node_text(n, source).trim_start_matches(':').trim().to_string()),
                    is_async,
                    calls: Vec::new(),
                }),
            )
            .with_docstring(Self::jsdoc_of(func, source))
            .with_source_text(node_text(func, source))
            .with_exported(Self::is_exported(func));

            if let Some(body) = func.child_by_field_name("body") {
                self.extract_calls(body, source, &mut entity, None, result);
            }
            result.entities.push(entity);
        }

        // Arrow functions bound to let/const are functions
        for decl in find_descendants(root, "lexical_declaration") {
            for declarator in find_children(decl, "variable_declarator") {
                let Some(value) = declarator.child_by_field_name("value") else {
                    continue;
                };
                if value.kind() != "arrow_function" {
                    continue;
                }
                let Some(name_node) = declarator.child_by_field_name("name") else {
                    continue;
                };
                let name = node_text(name_node, source);
                let qualified = build_qualified_name(&name, None, Some(module), ".");
                let is_async = {
                    let mut cursor = value.walk();
                    value.children(&mut cursor).any(|c| c.kind() == "async")
                };

                let mut entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    self.language(),
                    name,
                    qualified,
                    line_start(decl),
                    line_end(decl),
                    EntityKind::Function(FunctionDetail {
                        parameters: Self::parameters_of(value, source),
                        return_type: None,
                        is_async,
                        calls: Vec::new(),
                    }),
                )
                .with_source_text(node_text(decl, source))
                .with_exported(Self::is_exported(decl));

                if let Some(body) = value.child_by_field_name("body") {
                    self.extract_calls(body, source, &mut entity, None, result);
                }
                result.entities.push(entity);
            }
        }
    }

    fn parameters_of(node: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(list) = node.child_by_field_name("parameters") else {
            return params;
        };
        let mut cursor = list.walk();
        for child in list.children(&mut cursor) {
            match child.kind() {
                "required_parameter" | "optional_parameter" => {
                    let name = child
                        .child_by_field_name("pattern")
                        .map(|n| node_text(n, source))
                        .unwrap_or_default();
                    let ty = child.child_by_field_name("type").map(|n| {
                        node_text(n, source)
                            .trim_start_matches(':')
                            .trim()
                            .to_string()
                    });
                    params.push(Parameter {
                        name,
                        type_annotation: ty,
                        is_optional: child.kind() == "optional_parameter",
                    });
                }
                "identifier" => params.push(Parameter::new(node_text(child, source))),
                _ => {}
            }
        }
        params
    }

    fn extract_calls(
        &self,
        body: Node,
        source: &[u8],
        entity: &mut CodeEntity,
        parent_class: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let mut seen: Vec<String> = Vec::new();
        let class_simple =
            parent_class.map(|p| p.rsplit('.').next().unwrap_or(p).to_string());

        for call in find_descendants(body, "call_expression") {
            let Some(func_node) = call.child_by_field_name("function") else {
                continue;
            };
            let raw = match func_node.kind() {
                "identifier" | "member_expression" => node_text(func_node, source),
                _ => continue,
            };
            if raw.contains('\n') || raw.contains('(') {
                continue;
            }
            if raw.starts_with("console.") {
                continue;
            }

            let mut parts: Vec<String> = raw.split('.').map(str::to_string).collect();
            let mut receiver_expr = None;
            if parts.len() > 1 {
                if parts[0] == "this" {
                    if let Some(class_simple) = &class_simple {
                        parts[0] = class_simple.clone();
                    }
                } else {
                    receiver_expr = Some(parts[..parts.len() - 1].join("."));
                }
            }
            let callee = parts.join(".");
            let simple = callee.rsplit('.').next().unwrap_or(&callee);
            if SKIP_NAMES.contains(&simple) || seen.iter().any(|s| s == &callee) {
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

        // Explicit instantiation via `new`
        for new_expr in find_descendants(body, "new_expression") {
            let Some(ctor) = new_expr.child_by_field_name("constructor") else {
                continue;
            };
            let type_name = node_text(ctor, source);
            if seen.iter().any(|s| s == &type_name) {
                continue;
            }
            seen.push(type_name.clone());

            entity.push_call(&type_name);
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: type_name,
                relation_type: RelationType::Instantiates,
                line_number: Some(line_start(new_expr)),
                context_snippet: Some(source_line(new_expr, source)),
                receiver_expr: None,
            });
        }
    }
}

impl Extractor for TypeScriptExtractor {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["ts", "tsx"])
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
        self.extract_classes(root, ctx, &module, &mut result);
        self.extract_functions(root, ctx, &module, &mut result);

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
        let mut extractor = TypeScriptExtractor::new().unwrap();
        let path = Path::new("service.ts");
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    #[test]
    fn test_class_and_this_call() {
        let code = r#"export class Service extends Base {
    run(): void {
        this.helper();
    }

    helper(): void {}
}
"#;
        let result = extract(code);
        let class = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Class)
            .unwrap();
        assert_eq!(class.qualified_name, "service.Service");
        assert!(class.is_exported);

        let call = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Calls)
            .unwrap();
        assert_eq!(call.target_qualified_name, "Service.helper");
        assert_eq!(call.receiver_expr, None);

        let extends = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Extends)
            .unwrap();
        assert_eq!(extends.target_qualified_name, "Base");
    }

    #[test]
    fn test_interface_stored_as_abstract_class() {
        let code = r#"interface Shape extends Drawable {
    area(): number;
}
"#;
        let result = extract(code);
        let iface = result.entities.iter().find(|e| e.name == "Shape").unwrap();
        assert_eq!(iface.entity_type, EntityType::Class);
        match &iface.kind {
            EntityKind::Class(c) => {
                assert!(c.is_abstract);
                assert_eq!(c.base_classes, vec!["Drawable"]);
            }
            other => panic!("expected class, got {other:?}"),
        }
    }

    #[test]
    fn test_arrow_function_bound_to_const() {
        let code = r#"const handler = async (req: Request) => {
    process(req);
};
"#;
        let result = extract(code);
        let func = result
            .entities
            .iter()
            .find(|e| e.name == "handler")
            .unwrap();
        assert_eq!(func.entity_type, EntityType::Function);
        match &func.kind {
            EntityKind::Function(f) => {
                assert!(f.is_async);
                assert_eq!(f.calls, vec!["process"]);
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_console_and_timers_skipped() {
        let code = r#"function work() {
    console.log("hi");
    setTimeout(tick, 100);
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
        assert_eq!(calls[0].target_qualified_name, "helper");
    }

    #[test]
    fn test_imports() {
        let code = r#"import { useState, useEffect } from "react";
import * as fs from "fs";
import "./side-effect";
"#;
        let result = extract(code);
        let imports: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(imports.len(), 3);

        let react = imports
            .iter()
            .find(|e| e.qualified_name == "react.useState")
            .unwrap();
        match &react.kind {
            EntityKind::Import(i) => {
                assert_eq!(i.imported_symbols, vec!["useState", "useEffect"]);
                assert!(!i.is_relative);
            }
            other => panic!("expected import, got {other:?}"),
        }

        let fs_import = imports.iter().find(|e| e.qualified_name == "fs").unwrap();
        match &fs_import.kind {
            EntityKind::Import(i) => {
                assert!(i.is_wildcard);
                assert_eq!(i.alias.as_deref(), Some("fs"));
            }
            other => panic!("expected import, got {other:?}"),
        }

        let side_effect = imports
            .iter()
            .find(|e| e.qualified_name == "./side-effect")
            .unwrap();
        match &side_effect.kind {
            EntityKind::Import(i) => assert!(i.is_relative),
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_new_expression_is_instantiation() {
        let code = r#"function build() {
    return new Widget();
}
"#;
        let result = extract(code);
        let inst = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Instantiates)
            .unwrap();
        assert_eq!(inst.target_qualified_name, "Widget");
    }

    #[test]
    fn test_type_alias() {
        let code = "export type Id = string;\n";
        let result = extract(code);
        let alias = result.entities.iter().find(|e| e.name == "Id").unwrap();
        assert_eq!(alias.entity_type, EntityType::TypeAlias);
        assert!(alias.is_exported);
    }
}
