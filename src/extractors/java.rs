//! Java extractor.
//!
//! Packages form the module prefix. `new X()` is an explicit instantiation;
//! `this.method()` resolves to the enclosing class.

use std::path::Path;

use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{
    ClassDetail, CodeEntity, EntityKind, ExtractionResult, FunctionDetail, ImportDetail,
    MethodDetail, Parameter, PendingRef, RelationType, Visibility, build_qualified_name,
};

use super::treesitter::{
    collect_parse_errors, find_child, find_children, find_descendants, line_end, line_start,
    new_parser, node_text, source_line, strip_block_comment,
};
use super::{ExtractionContext, Extractor, has_extension};

pub struct JavaExtractor {
    parser: Parser,
}

impl JavaExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_java::LANGUAGE.into(), "java")?;
        Ok(Self { parser })
    }

    fn package_name(root: Node, source: &[u8]) -> Option<String> {
        find_child(root, "package_declaration").and_then(|decl| {
            find_child(decl, "scoped_identifier")
                .or_else(|| find_child(decl, "identifier"))
                .map(|n| node_text(n, source))
        })
    }

    fn javadoc_of(node: Node, source: &[u8]) -> Option<String> {
        let target = match node.parent() {
            // Annotated declarations keep the javadoc above the annotations
            Some(parent) if parent.kind() == "modifiers" => parent,
            _ => node,
        };
        let sibling = target.prev_sibling()?;
        if sibling.kind() == "block_comment" {
            let text = node_text(sibling, source);
            if text.starts_with("/**") {
                let doc = strip_block_comment(&text);
                return if doc.is_empty() { None } else { Some(doc) };
            }
        }
        None
    }

    fn modifiers_of(node: Node, source: &[u8]) -> (Visibility, bool, bool, Vec<String>) {
        let mut visibility = Visibility::Public;
        let mut is_static = false;
        let mut is_abstract = false;
        let mut annotations = Vec::new();
        if let Some(modifiers) = find_child(node, "modifiers") {
            let mut cursor = modifiers.walk();
            for child in modifiers.children(&mut cursor) {
                match child.kind() {
                    "public" => visibility = Visibility::Public,
                    "private" => visibility = Visibility::Private,
                    "protected" => visibility = Visibility::Protected,
                    "static" => is_static = true,
                    "abstract" => is_abstract = true,
                    "marker_annotation" | "annotation" => {
                        annotations.push(node_text(child, source));
                    }
                    _ => {}
                }
            }
        }
        (visibility, is_static, is_abstract, annotations)
    }

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for decl in find_children(root, "import_declaration") {
            let Some(path_node) =
                find_child(decl, "scoped_identifier").or_else(|| find_child(decl, "identifier"))
            else {
                continue;
            };
            let path = node_text(path_node, source);
            let is_wildcard = find_child(decl, "asterisk").is_some();
            let simple = path.rsplit('.').next().unwrap_or(&path).to_string();
            let source_module = path
                .rsplit_once('.')
                .map(|(m, _)| m.to_string())
                .unwrap_or_else(|| path.clone());

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "java",
                simple.clone(),
                path.clone(),
                line_start(decl),
                line_end(decl),
                EntityKind::Import(ImportDetail {
                    source_module,
                    imported_symbols: if is_wildcard {
                        vec!["*".to_string()]
                    } else {
                        vec![simple]
                    },
                    is_wildcard,
                    ..Default::default()
                }),
            );
            if !is_wildcard {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: path,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(decl)),
                    context_snippet: Some(source_line(decl, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);
        }
    }

    fn extract_class(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module: Option<&str>,
        is_interface: bool,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, None, module, ".");
        let (visibility, _, is_abstract, annotations) = Self::modifiers_of(node, source);

        let mut bases = Vec::new();
        let mut interfaces = Vec::new();
        if let Some(superclass) = find_child(node, "superclass") {
            let mut cursor = superclass.walk();
            for child in superclass.children(&mut cursor) {
                if matches!(child.kind(), "type_identifier" | "generic_type" | "scoped_type_identifier") {
                    bases.push(node_text(child, source));
                }
            }
        }
        if let Some(super_interfaces) = find_child(node, "super_interfaces") {
            for ty in find_descendants(super_interfaces, "type_identifier") {
                interfaces.push(node_text(ty, source));
            }
        }
        if is_interface {
            // extends on an interface lists parent interfaces
            if let Some(extends) = find_child(node, "extends_interfaces") {
                for ty in find_descendants(extends, "type_identifier") {
                    bases.push(node_text(ty, source));
                }
            }
        }

        let mut method_names = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for method in find_children(body, "method_declaration") {
                if let Some(n) = method.child_by_field_name("name") {
                    method_names.push(node_text(n, source));
                }
            }
        }

        let detail = ClassDetail {
            base_classes: bases.clone(),
            mixins: Vec::new(),
            is_abstract: is_abstract || is_interface,
            method_names,
        };
        let kind = if is_interface {
            EntityKind::Interface(detail)
        } else {
            EntityKind::Class(detail)
        };

        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "java",
            name,
            qualified.clone(),
            line_start(node),
            line_end(node),
            kind,
        )
        .with_docstring(Self::javadoc_of(node, source))
        .with_source_text(node_text(node, source))
        .with_decorators(annotations)
        .with_visibility(visibility)
        .with_exported(visibility == Visibility::Public);

        for base in &bases {
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: qualified.clone(),
                target_qualified_name: base.clone(),
                relation_type: RelationType::Extends,
                line_number: Some(line_start(node)),
                context_snippet: Some(source_line(node, source)),
                receiver_expr: None,
            });
        }
        for iface in &interfaces {
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: qualified.clone(),
                target_qualified_name: iface.clone(),
                relation_type: RelationType::Implements,
                line_number: Some(line_start(node)),
                context_snippet: Some(source_line(node, source)),
                receiver_expr: None,
            });
        }
        result.entities.push(entity);

        if let Some(body) = node.child_by_field_name("body") {
            for method in find_children(body, "method_declaration") {
                self.extract_method(method, ctx, &qualified, false, result);
            }
            for ctor in find_children(body, "constructor_declaration") {
                self.extract_method(ctor, ctx, &qualified, true, result);
            }
        }
    }

    fn extract_method(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        parent_class: &str,
        is_constructor: bool,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, Some(parent_class), None, ".");
        let (visibility, is_static, _, annotations) = Self::modifiers_of(node, source);

        let parameters = Self::parameters_of(node, source);
        let return_type = node
            .child_by_field_name("type")
            .map(|n| node_text(n, source));

        let signature_end = node
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or(node.end_byte());
        let signature = String::from_utf8_lossy(&source[node.start_byte()..signature_end])
            .trim()
            .to_string();

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "java",
            name,
            qualified,
            line_start(node),
            line_end(node),
            EntityKind::Method(MethodDetail {
                parent_class: parent_class.to_string(),
                parameters,
                return_type,
                is_static,
                is_constructor,
                ..Default::default()
            }),
        )
        .with_signature(signature)
        .with_docstring(Self::javadoc_of(node, source))
        .with_source_text(node_text(node, source))
        .with_decorators(annotations)
        .with_visibility(visibility)
        .with_exported(visibility == Visibility::Public);

        if let Some(body) = node.child_by_field_name("body") {
            self.extract_calls(body, source, &mut entity, parent_class, result);
        }
        result.entities.push(entity);
    }

    fn parameters_of(node: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(list) = node.child_by_field_name("parameters") else {
            return params;
        };
        for param in find_children(list, "formal_parameter") {
            let name = param
                .child_by_field_name("name")
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
        parent_class: &str,
        result: &mut ExtractionResult,
    ) {
        let mut seen: Vec<String> = Vec::new();
        let class_simple = parent_class.rsplit('.').next().unwrap_or(parent_class);

        for invocation in find_descendants(body, "method_invocation") {
            let Some(name_node) = invocation.child_by_field_name("name") else {
                continue;
            };
            let method = node_text(name_node, source);
            let object = invocation
                .child_by_field_name("object")
                .map(|o| node_text(o, source));

            let (callee, receiver_expr) = match object {
                Some(obj) if obj == "this" => (format!("{class_simple}.{method}"), None),
                Some(obj) => (format!("{obj}.{method}"), Some(obj)),
                None => (method, None),
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
                line_number: Some(line_start(invocation)),
                context_snippet: Some(source_line(invocation, source)),
                receiver_expr,
            });
        }

        // Explicit instantiation via `new`
        for creation in find_descendants(body, "object_creation_expression") {
            let Some(type_node) = creation.child_by_field_name("type") else {
                continue;
            };
            let type_name = node_text(type_node, source);
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
                line_number: Some(line_start(creation)),
                context_snippet: Some(source_line(creation, source)),
                receiver_expr: None,
            });
        }
    }
}

impl Extractor for JavaExtractor {
    fn language(&self) -> &'static str {
        "java"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["java"])
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
        for class in find_descendants(root, "class_declaration") {
            self.extract_class(class, ctx, package.as_deref(), false, &mut result);
        }
        for iface in find_descendants(root, "interface_declaration") {
            self.extract_class(iface, ctx, package.as_deref(), true, &mut result);
        }

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
        let mut extractor = JavaExtractor::new().unwrap();
        let path = Path::new("Service.java");
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    #[test]
    fn test_class_with_package_prefix() {
        let code = r#"package com.example.app;

public class Service extends Base implements Runnable {
    public void run() {
        this.helper();
    }

    private void helper() {}
}
"#;
        let result = extract(code);
        let class = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Class)
            .unwrap();
        assert_eq!(class.qualified_name, "com.example.app.Service");
        match &class.kind {
            EntityKind::Class(c) => {
                assert_eq!(c.base_classes, vec!["Base"]);
                assert_eq!(c.method_names, vec!["run", "helper"]);
            }
            other => panic!("expected class, got {other:?}"),
        }

        let extends: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Extends)
            .collect();
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].target_qualified_name, "Base");

        let implements: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Implements)
            .collect();
        assert_eq!(implements.len(), 1);
        assert_eq!(implements[0].target_qualified_name, "Runnable");

        // this.helper() resolves to the class simple name
        let call = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Calls)
            .unwrap();
        assert_eq!(call.target_qualified_name, "Service.helper");
        assert_eq!(call.receiver_expr, None);
    }

    #[test]
    fn test_new_expression_is_instantiation() {
        let code = r#"public class Factory {
    public Widget build() {
        return new Widget();
    }
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
    fn test_imports_with_wildcard() {
        let code = r#"package app;

import java.util.List;
import java.util.*;
"#;
        let result = extract(code);
        let imports: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(imports.len(), 2);

        let list = imports
            .iter()
            .find(|e| e.qualified_name == "java.util.List")
            .unwrap();
        match &list.kind {
            EntityKind::Import(i) => {
                assert_eq!(i.source_module, "java.util");
                assert!(!i.is_wildcard);
            }
            other => panic!("expected import, got {other:?}"),
        }

        let wildcard = imports
            .iter()
            .find(|e| e.qualified_name == "java.util")
            .unwrap();
        match &wildcard.kind {
            EntityKind::Import(i) => assert!(i.is_wildcard),
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_interface_and_javadoc() {
        let code = r#"/**
 * Runs things.
 */
public interface Runner {
    void run();
}
"#;
        let result = extract(code);
        let iface = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Interface)
            .unwrap();
        assert_eq!(iface.name, "Runner");
        assert_eq!(iface.docstring.as_deref(), Some("Runs things."));
    }

    #[test]
    fn test_method_visibility_and_annotations() {
        let code = r#"public class A {
    @Override
    protected String describe(int depth) {
        return "a";
    }
}
"#;
        let result = extract(code);
        let method = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Method)
            .unwrap();
        assert_eq!(method.visibility, Visibility::Protected);
        assert_eq!(method.decorators, vec!["@Override"]);
        match &method.kind {
            EntityKind::Method(m) => {
                assert_eq!(m.return_type.as_deref(), Some("String"));
                assert_eq!(m.parameters.len(), 1);
                assert_eq!(m.parameters[0].name, "depth");
            }
            other => panic!("expected method, got {other:?}"),
        }
    }
}
