//! Python extractor.
//!
//! Extracts classes (inheritance, decorators, methods), functions
//! (parameters, return types), imports (`import x`, `from x import y`),
//! and call sites with receiver tracking.

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
    new_parser, node_text, source_line,
};
use super::{ExtractionContext, Extractor, has_extension};

const SKIP_NAMES: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "dict", "set", "tuple", "range",
    "enumerate", "zip", "map", "filter", "sorted", "reversed", "min", "max", "sum", "any", "all",
    "abs", "round", "isinstance", "issubclass", "hasattr", "getattr", "setattr", "delattr",
    "type", "id", "repr", "hash", "super", "next", "iter", "open", "input",
];

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_python::LANGUAGE.into(), "python")?;
        Ok(Self { parser })
    }

    fn module_name(path: &Path) -> String {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if stem == "__init__" {
            path.parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or(stem)
                .to_string()
        } else {
            stem.to_string()
        }
    }

    fn extract_imports(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;

        // import x, y
        for imp in find_children(root, "import_statement") {
            for name_node in find_descendants(imp, "dotted_name") {
                let module = node_text(name_node, source);
                let simple = module.rsplit('.').next().unwrap_or(&module).to_string();
                let entity = CodeEntity::new(
                    ctx.repository_id,
                    ctx.file_id,
                    "python",
                    simple,
                    module.clone(),
                    line_start(imp),
                    line_end(imp),
                    EntityKind::Import(ImportDetail {
                        source_module: module.clone(),
                        ..Default::default()
                    }),
                );
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: module,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(imp)),
                    context_snippet: Some(source_line(imp, source)),
                    receiver_expr: None,
                });
                result.entities.push(entity);
            }
        }

        // from x import y, z
        for imp in find_children(root, "import_from_statement") {
            let relative_import = find_child(imp, "relative_import");
            let mut relative_level = 0u32;
            if let Some(rel) = relative_import
                && let Some(prefix) = find_child(rel, "import_prefix")
            {
                relative_level = prefix.child_count() as u32;
            }

            let module_node = match relative_import {
                Some(rel) => find_child(rel, "dotted_name"),
                None => find_children(imp, "dotted_name").into_iter().next(),
            };
            let module = module_node
                .map(|n| node_text(n, source))
                .unwrap_or_default();

            let mut symbols: Vec<String> = Vec::new();
            let mut alias: Option<String> = None;
            let mut cursor = imp.walk();
            for child in imp.children(&mut cursor) {
                match child.kind() {
                    "dotted_name" if Some(child) != module_node => {
                        symbols.push(node_text(child, source));
                    }
                    "aliased_import" => {
                        if let Some(name) = find_child(child, "dotted_name") {
                            symbols.push(node_text(name, source));
                        }
                        if let Some(alias_node) = child.child_by_field_name("alias") {
                            alias = Some(node_text(alias_node, source));
                        }
                    }
                    _ => {}
                }
            }
            let is_wildcard = {
                let mut cursor = imp.walk();
                imp.children(&mut cursor)
                    .any(|c| c.kind() == "wildcard_import")
            };
            if is_wildcard {
                symbols = vec!["*".to_string()];
            }

            let qualified_name = match symbols.first() {
                Some(sym) if !module.is_empty() => format!("{module}.{sym}"),
                Some(sym) => sym.clone(),
                None => module.clone(),
            };
            let name = symbols.first().cloned().unwrap_or_else(|| module.clone());

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "python",
                name,
                qualified_name.clone(),
                line_start(imp),
                line_end(imp),
                EntityKind::Import(ImportDetail {
                    source_module: module.clone(),
                    imported_symbols: symbols.clone(),
                    is_relative: relative_level > 0,
                    is_wildcard,
                    relative_level,
                    alias,
                }),
            );

            for sym in &symbols {
                if sym == "*" {
                    continue;
                }
                let target = if module.is_empty() {
                    sym.clone()
                } else {
                    format!("{module}.{sym}")
                };
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: entity.qualified_name.clone(),
                    target_qualified_name: target,
                    relation_type: RelationType::Imports,
                    line_number: Some(line_start(imp)),
                    context_snippet: Some(source_line(imp, source)),
                    receiver_expr: None,
                });
            }
            result.entities.push(entity);
        }
    }

    fn decorators_of(node: Node, source: &[u8]) -> Vec<String> {
        let mut decorators = Vec::new();
        if let Some(parent) = node.parent()
            && parent.kind() == "decorated_definition"
        {
            let mut cursor = parent.walk();
            for sibling in parent.children(&mut cursor) {
                if sibling.id() == node.id() {
                    break;
                }
                if sibling.kind() == "decorator" {
                    decorators.push(node_text(sibling, source));
                }
            }
        }
        decorators
    }

    /// Source text including any preceding decorator lines.
    fn full_source(node: Node, source: &[u8]) -> String {
        match node.parent() {
            Some(parent) if parent.kind() == "decorated_definition" => node_text(parent, source),
            _ => node_text(node, source),
        }
    }

    fn docstring_of(body: Option<Node>, source: &[u8]) -> Option<String> {
        let body = body?;
        let first = body.child(0)?;
        let string_node = match first.kind() {
            "string" => Some(first),
            "expression_statement" => find_child(first, "string"),
            _ => None,
        }?;
        let text = match find_child(string_node, "string_content") {
            Some(content) => node_text(content, source),
            None => node_text(string_node, source)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string(),
        };
        Some(text.trim().to_string())
    }

    fn extract_class(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module_name: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = find_child(node, "identifier") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified_name = build_qualified_name(&name, None, Some(module_name), ".");

        let mut bases = Vec::new();
        if let Some(args) = find_child(node, "argument_list") {
            let mut cursor = args.walk();
            for arg in args.children(&mut cursor) {
                if matches!(arg.kind(), "identifier" | "attribute") {
                    bases.push(node_text(arg, source));
                }
            }
        }

        let decorators = Self::decorators_of(node, source);
        let body = find_child(node, "block");
        let docstring = Self::docstring_of(body, source);
        let is_abstract = bases.iter().any(|b| b == "ABC" || b.ends_with(".ABC"))
            || decorators.iter().any(|d| d.contains("abstractmethod"));

        let mut method_names = Vec::new();
        if let Some(body) = body {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                let method_node = match child.kind() {
                    "function_definition" => Some(child),
                    "decorated_definition" => find_child(child, "function_definition"),
                    _ => None,
                };
                if let Some(m) = method_node
                    && let Some(n) = find_child(m, "identifier")
                {
                    method_names.push(node_text(n, source));
                }
            }
        }

        let class_entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "python",
            name.clone(),
            qualified_name.clone(),
            line_start(node),
            line_end(node),
            EntityKind::Class(ClassDetail {
                base_classes: bases.clone(),
                mixins: Vec::new(),
                is_abstract,
                method_names,
            }),
        )
        .with_docstring(docstring)
        .with_decorators(decorators)
        .with_source_text(Self::full_source(node, source));

        for base in &bases {
            result.pending_references.push(PendingRef {
                source_entity_id: class_entity.id,
                source_qualified_name: qualified_name.clone(),
                target_qualified_name: base.clone(),
                relation_type: RelationType::Extends,
                line_number: Some(line_start(node)),
                context_snippet: Some(source_line(node, source)),
                receiver_expr: None,
            });
        }
        result.entities.push(class_entity);

        if let Some(body) = body {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                let method_node = match child.kind() {
                    "function_definition" => Some(child),
                    "decorated_definition" => find_child(child, "function_definition"),
                    _ => None,
                };
                if let Some(m) = method_node {
                    self.extract_function(m, ctx, module_name, Some(&qualified_name), result);
                }
            }
        }
    }

    fn extract_function(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module_name: &str,
        parent_class: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = find_child(node, "identifier") else {
            return;
        };
        let name = node_text(name_node, source);
        // A qualified parent already carries the module prefix
        let qualified_name = match parent_class {
            Some(parent) => build_qualified_name(&name, Some(parent), None, "."),
            None => build_qualified_name(&name, None, Some(module_name), "."),
        };

        let params = Self::extract_parameters(node, source);
        let return_type = find_child(node, "type").map(|n| node_text(n, source));
        let decorators = Self::decorators_of(node, source);
        let body = find_child(node, "block");
        let docstring = Self::docstring_of(body, source);

        let param_str = params
            .iter()
            .map(|p| match &p.type_annotation {
                Some(ty) => format!("{}: {ty}", p.name),
                None => p.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut signature = format!("def {name}({param_str})");
        if let Some(ret) = &return_type {
            signature.push_str(&format!(" -> {ret}"));
        }

        let is_async = {
            let mut cursor = node.walk();
            node.children(&mut cursor).any(|c| c.kind() == "async")
        };

        let kind = match parent_class {
            Some(parent) => EntityKind::Method(MethodDetail {
                parent_class: parent.to_string(),
                parameters: params,
                return_type,
                is_async,
                is_static: decorators.iter().any(|d| d.contains("staticmethod")),
                is_classmethod: decorators.iter().any(|d| d.contains("classmethod")),
                is_property: decorators.iter().any(|d| d.contains("property")),
                is_constructor: name == "__init__",
                calls: Vec::new(),
            }),
            None => EntityKind::Function(FunctionDetail {
                parameters: params,
                return_type,
                is_async,
                calls: Vec::new(),
            }),
        };

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "python",
            name,
            qualified_name,
            line_start(node),
            line_end(node),
            kind,
        )
        .with_signature(signature)
        .with_docstring(docstring)
        .with_decorators(decorators)
        .with_source_text(Self::full_source(node, source));

        if let Some(body) = body {
            self.extract_calls(body, source, &mut entity, parent_class, result);
        }
        result.entities.push(entity);
    }

    fn extract_parameters(func_node: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(params_node) = find_child(func_node, "parameters") else {
            return params;
        };
        let mut cursor = params_node.walk();
        for child in params_node.children(&mut cursor) {
            let param = match child.kind() {
                "identifier" => Some(Parameter::new(node_text(child, source))),
                "typed_parameter" => {
                    let name = find_child(child, "identifier")
                        .map(|n| node_text(n, source))
                        .unwrap_or_default();
                    let ty = find_child(child, "type").map(|n| node_text(n, source));
                    Some(Parameter {
                        name,
                        type_annotation: ty,
                        is_optional: false,
                    })
                }
                "default_parameter" => {
                    let name = find_child(child, "identifier")
                        .map(|n| node_text(n, source))
                        .unwrap_or_default();
                    Some(Parameter {
                        name,
                        type_annotation: None,
                        is_optional: true,
                    })
                }
                "typed_default_parameter" => {
                    let name = find_child(child, "identifier")
                        .map(|n| node_text(n, source))
                        .unwrap_or_default();
                    let ty = find_child(child, "type").map(|n| node_text(n, source));
                    Some(Parameter {
                        name,
                        type_annotation: ty,
                        is_optional: true,
                    })
                }
                _ => None,
            };
            if let Some(param) = param
                && param.name != "self"
                && param.name != "cls"
            {
                params.push(param);
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

        for call_node in find_descendants(body, "call") {
            let Some(callee) = Self::resolve_callee(call_node, source, parent_class) else {
                continue;
            };
            let simple = callee.rsplit('.').next().unwrap_or(&callee);
            if SKIP_NAMES.contains(&simple) || seen.iter().any(|s| s == &callee) {
                continue;
            }
            seen.push(callee.clone());

            let relation_type = if simple.chars().next().is_some_and(char::is_uppercase) {
                RelationType::Instantiates
            } else {
                RelationType::Calls
            };
            let receiver_expr = Self::receiver_expr(call_node, source, parent_class);

            entity.push_call(&callee);
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: callee,
                relation_type,
                line_number: Some(line_start(call_node)),
                context_snippet: Some(source_line(call_node, source)),
                receiver_expr,
            });
        }
    }

    fn resolve_callee(call_node: Node, source: &[u8], parent_class: Option<&str>) -> Option<String> {
        let func_child = call_node.child(0)?;
        match func_child.kind() {
            "identifier" => Some(node_text(func_child, source)),
            "attribute" => {
                let full = node_text(func_child, source);
                let mut parts: Vec<&str> = full.split('.').collect();
                let class_simple =
                    parent_class.map(|p| p.rsplit('.').next().unwrap_or(p).to_string());
                if matches!(parts.first(), Some(&"self") | Some(&"cls"))
                    && let Some(class_simple) = &class_simple
                {
                    parts[0] = class_simple;
                }
                Some(parts.join("."))
            }
            _ => None,
        }
    }

    /// Receiver expression: everything before the final attribute. `self`/
    /// `cls` receivers are already bound to the class, so no receiver.
    fn receiver_expr(call_node: Node, source: &[u8], parent_class: Option<&str>) -> Option<String> {
        let func_child = call_node.child(0)?;
        if func_child.kind() != "attribute" {
            return None;
        }
        let full = node_text(func_child, source);
        let parts: Vec<&str> = full.split('.').collect();
        if matches!(parts.first(), Some(&"self") | Some(&"cls")) && parent_class.is_some() {
            return None;
        }
        if parts.len() > 1 {
            Some(parts[..parts.len() - 1].join("."))
        } else {
            None
        }
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["py", "pyi"])
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
        let module_name = Self::module_name(ctx.file_path);

        self.extract_imports(root, ctx, &mut result);

        for class_node in find_descendants(root, "class_definition") {
            self.extract_class(class_node, ctx, &module_name, &mut result);
        }

        // Top-level functions only; methods were handled with their class
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            let func_node = match child.kind() {
                "function_definition" => Some(child),
                "decorated_definition" => find_child(child, "function_definition"),
                _ => None,
            };
            if let Some(f) = func_node {
                self.extract_function(f, ctx, &module_name, None, &mut result);
            }
        }

        if root.has_error() {
            result.parse_errors = collect_parse_errors(root);
        }
        Ok(result)
    }
}
