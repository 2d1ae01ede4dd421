//! Kotlin extractor.
//!
//! Packages form the module prefix. `suspend` marks functions async.
//! `data`/`sealed` classes, objects, and interfaces are recognized. Named
//! companion objects emit entities; unnamed ones are skipped.

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

pub struct KotlinExtractor {
    parser: Parser,
}

impl KotlinExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_kotlin_codanna::language(), "kotlin")?;
        Ok(Self { parser })
    }

    fn package_name(root: Node, source: &[u8]) -> Option<String> {
        find_child(root, "package_header").and_then(|header| {
            find_child(header, "identifier")
                .or_else(|| find_child(header, "qualified_identifier"))
                .map(|n| node_text(n, source))
        })
    }

    fn kdoc_of(node: Node, source: &[u8]) -> Option<String> {
        let sibling = node.prev_sibling()?;
        if sibling.kind().contains("comment") {
            let text = node_text(sibling, source);
            if text.starts_with("/**") {
                let doc = strip_block_comment(&text);
                return if doc.is_empty() { None } else { Some(doc) };
            }
        }
        None
    }

    fn modifier_text(node: Node, source: &[u8]) -> String {
        find_child(node, "modifiers")
            .map(|m| node_text(m, source))
            .unwrap_or_default()
    }

    fn visibility_from_modifiers(modifiers: &str) -> Visibility {
        if modifiers.contains("private") {
            Visibility::Private
        } else if modifiers.contains("protected") {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let mut headers = find_descendants(root, "import_header");
        if headers.is_empty() {
            headers = find_descendants(root, "import");
        }
        for header in headers {
            let Some(path_node) = find_child(header, "identifier")
                .or_else(|| find_child(header, "qualified_identifier"))
            else {
                continue;
            };
            let path = node_text(path_node, source);
            let is_wildcard = node_text(header, source).trim_end().ends_with(".*");
            let alias = find_child(header, "import_alias")
                .and_then(|a| {
                    find_child(a, "type_identifier").or_else(|| find_child(a, "simple_identifier"))
                })
                .map(|n| node_text(n, source));
            let simple = path.rsplit('.').next().unwrap_or(&path).to_string();
            let source_module = path
                .rsplit_once('.')
                .map(|(m, _)| m.to_string())
                .unwrap_or_else(|| path.clone());

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "kotlin",
                simple.clone(),
                path.clone(),
                line_start(header),
                line_end(header),
                EntityKind::Import(ImportDetail {
                    source_module,
                    imported_symbols: if is_wildcard {
                        vec!["*".to_string()]
                    } else {
                        vec![simple]
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
                    target_qualified_name: path,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(header)),
                    context_snippet: Some(source_line(header, source)),
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
        package: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;

        // Objects and named companion objects are classes; unnamed
        // companion objects are skipped (best-effort)
        for obj in find_descendants(root, "object_declaration")
            .into_iter()
            .chain(find_descendants(root, "companion_object"))
        {
            let Some(name_node) = find_child(obj, "type_identifier")
                .or_else(|| find_child(obj, "simple_identifier"))
            else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, package, ".");
            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "kotlin",
                name,
                qualified,
                line_start(obj),
                line_end(obj),
                EntityKind::Class(ClassDetail::default()),
            )
            .with_docstring(Self::kdoc_of(obj, source))
            .with_source_text(node_text(obj, source));
            result.entities.push(entity);
        }

        for decl in find_descendants(root, "class_declaration") {
            let Some(name_node) = decl
                .child_by_field_name("name")
                .or_else(|| find_child(decl, "type_identifier"))
                .or_else(|| find_child(decl, "simple_identifier"))
            else {
                continue;
            };
            let name = node_text(name_node, source);
            let qualified = build_qualified_name(&name, None, package, ".");

            let header_text = node_text(decl, source);
            let is_interface = {
                let mut cursor = decl.walk();
                decl.children(&mut cursor).any(|c| c.kind() == "interface")
            } || header_text.trim_start().starts_with("interface")
                || header_text.contains("\ninterface ");
            let modifiers = Self::modifier_text(decl, source);
            let is_abstract = modifiers.contains("abstract") || modifiers.contains("sealed");

            // Supertypes: constructor invocation => class (extends),
            // bare user type => interface (implements)
            let mut extends = Vec::new();
            let mut implements = Vec::new();
            for spec in find_descendants(decl, "delegation_specifier") {
                if let Some(ctor) = find_child(spec, "constructor_invocation") {
                    if let Some(ty) = find_descendants(ctor, "type_identifier").into_iter().next() {
                        extends.push(node_text(ty, source));
                    }
                } else if let Some(ty) =
                    find_descendants(spec, "type_identifier").into_iter().next()
                {
                    implements.push(node_text(ty, source));
                }
            }

            let mut method_names = Vec::new();
            if let Some(body) = find_child(decl, "class_body") {
                for func in find_children(body, "function_declaration") {
                    if let Some(n) = find_child(func, "simple_identifier") {
                        method_names.push(node_text(n, source));
                    }
                }
            }

            let detail = ClassDetail {
                base_classes: extends.clone(),
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
                "kotlin",
                name,
                qualified.clone(),
                line_start(decl),
                line_end(decl),
                kind,
            )
            .with_docstring(Self::kdoc_of(decl, source))
            .with_source_text(header_text)
            .with_visibility(Self::visibility_from_modifiers(&modifiers))
            .with_exported(!modifiers.contains("private"));

            for base in &extends {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: base.clone(),
                    relation_type: RelationType::Extends,
                    line_number: Some(line_start(decl)),
                    context_snippet: Some(source_line(decl, source)),
                    receiver_expr: None,
                });
            }
            for iface in &implements {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: iface.clone(),
                    relation_type: RelationType::Implements,
                    line_number: Some(line_start(decl)),
                    context_snippet: Some(source_line(decl, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);

            if let Some(body) = find_child(decl, "class_body") {
                for func in find_children(body, "function_declaration") {
                    self.extract_function(func, ctx, package, Some(&qualified), result);
                }
            }
        }
    }

    fn extract_function(
        &self,
        func: Node,
        ctx: &ExtractionContext<'_>,
        package: Option<&str>,
        parent_class: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = find_child(func, "simple_identifier") else {
            return;
        };
        let name = node_text(name_node, source);
        let modifiers = Self::modifier_text(func, source);
        let is_async = modifiers.contains("suspend");

        let qualified = match parent_class {
            Some(parent) => build_qualified_name(&name, Some(parent), None, "."),
            None => build_qualified_name(&name, None, package, "."),
        };

        let parameters = Self::parameters_of(func, source);
        let return_type = find_child(func, "user_type").map(|n| node_text(n, source));

        let signature_end = find_child(func, "function_body")
            .map(|b| b.start_byte())
            .unwrap_or(func.end_byte());
        let signature = String::from_utf8_lossy(&source[func.start_byte()..signature_end])
            .trim()
            .to_string();

        let kind = match parent_class {
            Some(parent) => EntityKind::Method(MethodDetail {
                parent_class: parent.to_string(),
                parameters,
                return_type,
                is_async,
                ..Default::default()
            }),
            None => EntityKind::Function(FunctionDetail {
                parameters,
                return_type,
                is_async,
                calls: Vec::new(),
            }),
        };

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "kotlin",
            name,
            qualified,
            line_start(func),
            line_end(func),
            kind,
        )
        .with_signature(signature)
        .with_docstring(Self::kdoc_of(func, source))
        .with_source_text(node_text(func, source))
        .with_visibility(Self::visibility_from_modifiers(&modifiers))
        .with_exported(!modifiers.contains("private"));

        if let Some(body) = find_child(func, "function_body") {
            self.extract_calls(body, source, &mut entity, parent_class, result);
        }
        result.entities.push(entity);
    }

    fn parameters_of(func: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        for param in find_descendants(func, "parameter") {
            let name = find_child(param, "simple_identifier")
                .map(|n| node_text(n, source))
                .unwrap_or_default();
            let ty = find_child(param, "user_type")
                .or_else(|| find_child(param, "nullable_type"))
                .map(|n| node_text(n, source));
            if !name.is_empty() {
                params.push(Parameter {
                    name,
                    type_annotation: ty,
                    is_optional: false,
                });
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
            let Some(callee_node) = call.child(0) else {
                continue;
            };
            let raw = match callee_node.kind() {
                "simple_identifier" => node_text(callee_node, source),
                "navigation_expression" => node_text(callee_node, source),
                _ => continue,
            };
            if raw.contains('\n') || raw.contains('(') {
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

            if seen.iter().any(|s| s == &callee) {
                continue;
            }
            seen.push(callee.clone());

            let simple = callee.rsplit('.').next().unwrap_or(&callee);
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

impl Extractor for KotlinExtractor {
    fn language(&self) -> &'static str {
        "kotlin"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["kt", "kts"])
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
        self.extract_classes(root, ctx, package.as_deref(), &mut result);

        // Top-level functions (not inside a class body)
        for func in find_descendants(root, "function_declaration") {
            let mut inside_class = false;
            let mut current = func.parent();
            while let Some(parent) = current {
                if parent.kind() == "class_body" {
                    inside_class = true;
                    break;
                }
                current = parent.parent();
            }
            if !inside_class {
                self.extract_function(func, ctx, package.as_deref(), None, &mut result);
            }
        }

        if root.has_error() {
            result.parse_errors = collect_parse_errors(root);
        }
        Ok(result)
    }
}
