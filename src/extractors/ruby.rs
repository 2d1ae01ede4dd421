//! Ruby extractor.
//!
//! Modules are module entities (not classes). Mixins (`include`/`extend`/
//! `prepend`) become implements references. `.new` is instantiation.
//! Block-scoped visibility (`private`/`protected`/`public`) is tracked while
//! scanning a class body. Recognized DSLs: RSpec (`describe`/`context`/`it`/
//! `let`/`subject`/`before`/`after`/`shared_examples`/`it_behaves_like`),
//! Rake (`task`/`namespace`), Rails associations/scopes/delegate, and
//! Gemfile `gem` dependencies.

use std::path::Path;

use tree_sitter::{Node, Parser};
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{
    ClassDetail, CodeEntity, EntityKind, ExtractionResult, FunctionDetail, ImportDetail,
    MethodDetail, Parameter, PendingRef, RelationType, VariableDetail, Visibility,
    build_qualified_name, snake_to_pascal,
};

use super::treesitter::{
    collect_parse_errors, find_child, find_descendants, leading_comment_doc, line_end, line_start,
    new_parser, node_text, source_line,
};
use super::{ExtractionContext, Extractor, has_extension, has_file_name};

const SKIP_NAMES: &[&str] = &[
    "puts", "print", "p", "pp", "raise", "require", "require_relative", "attr_reader",
    "attr_writer", "attr_accessor", "loop", "lambda", "proc", "freeze", "new",
];

const RAILS_ASSOCIATIONS: &[&str] = &["belongs_to", "has_many", "has_one", "has_and_belongs_to_many"];

const RSPEC_GROUPS: &[&str] = &["describe", "context"];

const RSPEC_SHARED: &[&str] = &["shared_examples", "shared_context"];

const RSPEC_HOOKS: &[&str] = &["before", "after", "around"];

pub struct RubyExtractor {
    parser: Parser,
}

impl RubyExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        let parser = new_parser(&tree_sitter_ruby::LANGUAGE.into(), "ruby")?;
        Ok(Self { parser })
    }

    fn module_name(path: &Path) -> String {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    fn is_gemfile(path: &Path) -> bool {
        has_file_name(path, &["Gemfile"])
    }

    fn is_rakefile(path: &Path) -> bool {
        has_file_name(path, &["Rakefile"]) || has_extension(path, &["rake"])
    }

    /// The string or symbol payload of a call argument.
    fn literal_argument(call: Node, source: &[u8]) -> Option<String> {
        let args = call.child_by_field_name("arguments")?;
        let first = args.named_child(0)?;
        match first.kind() {
            "string" => Some(
                node_text(first, source)
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_string(),
            ),
            "simple_symbol" => Some(node_text(first, source).trim_start_matches(':').to_string()),
            "constant" | "scope_resolution" => Some(node_text(first, source)),
            _ => None,
        }
    }

    fn symbol_arguments(call: Node, source: &[u8]) -> Vec<String> {
        let Some(args) = call.child_by_field_name("arguments") else {
            return Vec::new();
        };
        find_descendants(args, "simple_symbol")
            .into_iter()
            .map(|s| node_text(s, source).trim_start_matches(':').to_string())
            .collect()
    }

    fn method_name_of(call: Node, source: &[u8]) -> Option<String> {
        call.child_by_field_name("method")
            .map(|m| node_text(m, source))
    }

    fn parameters_of(method: Node, source: &[u8]) -> Vec<Parameter> {
        let mut params = Vec::new();
        let Some(list) = find_child(method, "method_parameters") else {
            return params;
        };
        let mut cursor = list.walk();
        for child in list.children(&mut cursor) {
            match child.kind() {
                "identifier" => params.push(Parameter::new(node_text(child, source))),
                "optional_parameter" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        params.push(Parameter {
                            name: node_text(name, source),
                            type_annotation: None,
                            is_optional: true,
                        });
                    }
                }
                "keyword_parameter" | "splat_parameter" | "block_parameter" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        params.push(Parameter::new(node_text(name, source)));
                    }
                }
                _ => {}
            }
        }
        params
    }

    // =========================================================================
    // Class / module bodies
    // =========================================================================

    fn extract_class(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        // Namespaced names like User::Profile are kept as written
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, None, Some(module), ".");

        let mut bases = Vec::new();
        if let Some(superclass) = node.child_by_field_name("superclass") {
            let base = node_text(superclass, source)
                .trim_start_matches('<')
                .trim()
                .to_string();
            if !base.is_empty() {
                bases.push(base);
            }
        }

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "ruby",
            name.clone(),
            qualified.clone(),
            line_start(node),
            line_end(node),
            EntityKind::Class(ClassDetail {
                base_classes: bases.clone(),
                ..Default::default()
            }),
        )
        .with_docstring(leading_comment_doc(node, source, &["#"]))
        .with_source_text(node_text(node, source));

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

        if let Some(body) = node
            .child_by_field_name("body")
            .or_else(|| find_child(node, "body_statement"))
        {
            self.extract_body(body, ctx, &name, &qualified, &mut entity, result);
        }
        result.entities.push(entity);
    }

    fn extract_module(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, None, Some(module), ".");

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "ruby",
            name.clone(),
            qualified.clone(),
            line_start(node),
            line_end(node),
            EntityKind::Module,
        )
        .with_docstring(leading_comment_doc(node, source, &["#"]))
        .with_source_text(node_text(node, source));

        if let Some(body) = node
            .child_by_field_name("body")
            .or_else(|| find_child(node, "body_statement"))
        {
            self.extract_body(body, ctx, &name, &qualified, &mut entity, result);
        }
        result.entities.push(entity);
    }

    /// Walk a class/module body tracking block-scoped visibility, emitting
    /// methods, mixins, constants, attr accessors, and Rails DSL entities.
    #[allow(clippy::too_many_arguments)]
    fn extract_body(
        &self,
        body: Node,
        ctx: &ExtractionContext<'_>,
        owner_name: &str,
        owner_qualified: &str,
        owner: &mut CodeEntity,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let mut current_visibility = Visibility::Public;
        // Inline `private :foo, :bar` forms, applied after the scan
        let mut inline_overrides: Vec<(String, Visibility)> = Vec::new();

        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            match child.kind() {
                "method" => {
                    self.extract_method(
                        child,
                        ctx,
                        owner_name,
                        owner_qualified,
                        current_visibility,
                        owner,
                        result,
                    );
                }
                "singleton_method" => {
                    // def self.name — a class-level method
                    self.extract_method(
                        child,
                        ctx,
                        owner_name,
                        owner_qualified,
                        current_visibility,
                        owner,
                        result,
                    );
                    if let Some(last) = result.entities.last_mut()
                        && let EntityKind::Method(m) = &mut last.kind
                    {
                        m.is_static = true;
                    }
                }
                "class" => self.extract_class(child, ctx, owner_qualified, result),
                "module" => self.extract_module(child, ctx, owner_qualified, result),
                "assignment" => {
                    self.extract_constant(child, ctx, owner_qualified, result);
                }
                "identifier" => {
                    // Bare visibility keyword changes the current scope
                    match node_text(child, source).as_str() {
                        "private" => current_visibility = Visibility::Private,
                        "protected" => current_visibility = Visibility::Protected,
                        "public" => current_visibility = Visibility::Public,
                        _ => {}
                    }
                }
                "call" => {
                    let method = Self::method_name_of(child, source).unwrap_or_default();
                    match method.as_str() {
                        "private" | "protected" | "public" => {
                            let vis = match method.as_str() {
                                "private" => Visibility::Private,
                                "protected" => Visibility::Protected,
                                _ => Visibility::Public,
                            };
                            let targets = Self::symbol_arguments(child, source);
                            if targets.is_empty() {
                                current_visibility = vis;
                            } else {
                                for t in targets {
                                    inline_overrides.push((t, vis));
                                }
                            }
                        }
                        "include" | "extend" | "prepend" => {
                            self.extract_mixin(child, ctx, owner_qualified, owner, result);
                        }
                        "attr_reader" | "attr_writer" | "attr_accessor" => {
                            for attr in Self::symbol_arguments(child, source) {
                                let qualified =
                                    build_qualified_name(&attr, Some(owner_qualified), None, ".");
                                let entity = CodeEntity::new(
                                    ctx.repository_id,
                                    ctx.file_id,
                                    "ruby",
                                    attr,
                                    qualified,
                                    line_start(child),
                                    line_end(child),
                                    EntityKind::Method(MethodDetail {
                                        parent_class: owner_name.to_string(),
                                        is_property: true,
                                        ..Default::default()
                                    }),
                                )
                                .with_decorators(vec![method.clone()])
                                .with_visibility(current_visibility);
                                result.entities.push(entity);
                            }
                        }
                        assoc if RAILS_ASSOCIATIONS.contains(&assoc) => {
                            if let Some(target) = Self::symbol_arguments(child, source).first() {
                                // has_many :users => class User
                                let singular = target.trim_end_matches('s');
                                let class_name = snake_to_pascal(if assoc == "has_many" {
                                    singular
                                } else {
                                    target
                                });
                                result.pending_references.push(PendingRef {
                                    source_entity_id: owner.id,
                                    source_qualified_name: owner_qualified.to_string(),
                                    target_qualified_name: class_name,
                                    relation_type: RelationType::References,
                                    line_number: Some(line_start(child)),
                                    context_snippet: Some(source_line(child, source)),
                                    receiver_expr: None,
                                });
                            }
                        }
                        "scope" => {
                            if let Some(scope_name) =
                                Self::symbol_arguments(child, source).first()
                            {
                                let qualified = build_qualified_name(
                                    scope_name,
                                    Some(owner_qualified),
                                    None,
                                    ".",
                                );
                                let entity = CodeEntity::new(
                                    ctx.repository_id,
                                    ctx.file_id,
                                    "ruby",
                                    scope_name.clone(),
                                    qualified,
                                    line_start(child),
                                    line_end(child),
                                    EntityKind::Method(MethodDetail {
                                        parent_class: owner_name.to_string(),
                                        is_static: true,
                                        ..Default::default()
                                    }),
                                )
                                .with_decorators(vec!["scope".to_string()]);
                                result.entities.push(entity);
                            }
                        }
                        "delegate" => {
                            for delegated in Self::symbol_arguments(child, source) {
                                if delegated == "to" {
                                    continue;
                                }
                                let qualified = build_qualified_name(
                                    &delegated,
                                    Some(owner_qualified),
                                    None,
                                    ".",
                                );
                                let entity = CodeEntity::new(
                                    ctx.repository_id,
                                    ctx.file_id,
                                    "ruby",
                                    delegated,
                                    qualified,
                                    line_start(child),
                                    line_end(child),
                                    EntityKind::Method(MethodDetail {
                                        parent_class: owner_name.to_string(),
                                        ..Default::default()
                                    }),
                                )
                                .with_decorators(vec!["delegate".to_string()]);
                                result.entities.push(entity);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for (method_name, vis) in inline_overrides {
            let qualified = build_qualified_name(&method_name, Some(owner_qualified), None, ".");
            if let Some(entity) = result
                .entities
                .iter_mut()
                .find(|e| e.qualified_name == qualified)
            {
                entity.visibility = vis;
            }
        }
    }

    fn extract_mixin(
        &self,
        call: Node,
        ctx: &ExtractionContext<'_>,
        owner_qualified: &str,
        owner: &mut CodeEntity,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(args) = call.child_by_field_name("arguments") else {
            return;
        };
        for arg in find_descendants(args, "constant")
            .into_iter()
            .chain(find_descendants(args, "scope_resolution"))
        {
            // scope_resolution descendants re-list inner constants
            if arg
                .parent()
                .is_some_and(|p| p.kind() == "scope_resolution")
            {
                continue;
            }
            let mixin = node_text(arg, source);
            if let EntityKind::Class(detail) = &mut owner.kind {
                detail.mixins.push(mixin.clone());
            }
            result.pending_references.push(PendingRef {
                source_entity_id: owner.id,
                source_qualified_name: owner_qualified.to_string(),
                target_qualified_name: mixin,
                relation_type: RelationType::Implements,
                line_number: Some(line_start(call)),
                context_snippet: Some(source_line(call, source)),
                receiver_expr: None,
            });
        }
    }

    fn extract_constant(
        &self,
        assignment: Node,
        ctx: &ExtractionContext<'_>,
        owner_qualified: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "constant" {
            return;
        }
        let name = node_text(left, source);
        let qualified = build_qualified_name(&name, Some(owner_qualified), None, ".");
        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "ruby",
            name,
            qualified,
            line_start(assignment),
            line_end(assignment),
            EntityKind::Variable(VariableDetail {
                is_constant: true,
                value_type: None,
            }),
        )
        .with_source_text(node_text(assignment, source));
        result.entities.push(entity);
    }

    #[allow(clippy::too_many_arguments)]
    fn extract_method(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        owner_name: &str,
        owner_qualified: &str,
        visibility: Visibility,
        owner: &mut CodeEntity,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, Some(owner_qualified), None, ".");
        let params = Self::parameters_of(node, source);

        if let EntityKind::Class(detail) = &mut owner.kind {
            detail.method_names.push(name.clone());
        }

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "ruby",
            name.clone(),
            qualified,
            line_start(node),
            line_end(node),
            EntityKind::Method(MethodDetail {
                parent_class: owner_name.to_string(),
                parameters: params.clone(),
                is_constructor: name == "initialize",
                ..Default::default()
            }),
        )
        .with_signature(format!(
            "def {name}({})",
            params
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .with_docstring(leading_comment_doc(node, source, &["#"]))
        .with_source_text(node_text(node, source))
        .with_visibility(visibility);

        if let Some(body) = node
            .child_by_field_name("body")
            .or_else(|| find_child(node, "body_statement"))
        {
            self.extract_calls(body, source, &mut entity, Some(owner_name), result);
        }
        result.entities.push(entity);
    }

    fn extract_function(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualified = build_qualified_name(&name, None, Some(module), ".");
        let params = Self::parameters_of(node, source);

        let mut entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "ruby",
            name.clone(),
            qualified,
            line_start(node),
            line_end(node),
            EntityKind::Function(FunctionDetail {
                parameters: params.clone(),
                ..Default::default()
            }),
        )
        .with_signature(format!(
            "def {name}({})",
            params
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .with_docstring(leading_comment_doc(node, source, &["#"]))
        .with_source_text(node_text(node, source));

        if let Some(body) = node
            .child_by_field_name("body")
            .or_else(|| find_child(node, "body_statement"))
        {
            self.extract_calls(body, source, &mut entity, None, result);
        }
        result.entities.push(entity);
    }

    fn extract_calls(
        &self,
        body: Node,
        source: &[u8],
        entity: &mut CodeEntity,
        owner_name: Option<&str>,
        result: &mut ExtractionResult,
    ) {
        let mut seen: Vec<String> = Vec::new();

        for call in find_descendants(body, "call") {
            let Some(method) = Self::method_name_of(call, source) else {
                continue;
            };
            let receiver = call
                .child_by_field_name("receiver")
                .map(|r| node_text(r, source));

            // `.new` on a constant is an instantiation of that class
            if method == "new" {
                if let Some(class_name) = receiver.clone()
                    && class_name
                        .chars()
                        .next()
                        .is_some_and(char::is_uppercase)
                {
                    if seen.iter().any(|s| s == &class_name) {
                        continue;
                    }
                    seen.push(class_name.clone());
                    entity.push_call(&class_name);
                    result.pending_references.push(PendingRef {
                        source_entity_id: entity.id,
                        source_qualified_name: entity.qualified_name.clone(),
                        target_qualified_name: class_name,
                        relation_type: RelationType::Instantiates,
                        line_number: Some(line_start(call)),
                        context_snippet: Some(source_line(call, source)),
                        receiver_expr: None,
                    });
                }
                continue;
            }

            if SKIP_NAMES.contains(&method.as_str()) {
                continue;
            }

            let (callee, receiver_expr) = match receiver {
                Some(r) if r == "self" => {
                    let class_simple = owner_name
                        .map(|o| o.rsplit("::").next().unwrap_or(o))
                        .unwrap_or("self");
                    (format!("{class_simple}.{method}"), None)
                }
                Some(r) => (format!("{r}.{method}"), Some(r)),
                None => (method.clone(), None),
            };
            if callee.contains('\n') || seen.iter().any(|s| s == &callee) {
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

    // =========================================================================
    // require / Gemfile / Rake / RSpec
    // =========================================================================

    fn extract_requires(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for call in find_descendants(root, "call") {
            let Some(method) = Self::method_name_of(call, source) else {
                continue;
            };
            if method != "require" && method != "require_relative" {
                continue;
            }
            let Some(module) = Self::literal_argument(call, source) else {
                continue;
            };
            let is_relative = method == "require_relative";
            let simple = module.rsplit('/').next().unwrap_or(&module).to_string();

            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "ruby",
                simple,
                module.clone(),
                line_start(call),
                line_end(call),
                EntityKind::Import(ImportDetail {
                    source_module: module.clone(),
                    is_relative,
                    ..Default::default()
                }),
            );
            result.pending_references.push(PendingRef {
                source_entity_id: entity.id,
                source_qualified_name: entity.qualified_name.clone(),
                target_qualified_name: module,
                relation_type: RelationType::Imports,
                line_number: Some(line_start(call)),
                context_snippet: Some(source_line(call, source)),
                receiver_expr: None,
            });
            result.entities.push(entity);
        }
    }

    fn extract_gemfile(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for call in find_descendants(root, "call") {
            if Self::method_name_of(call, source).as_deref() != Some("gem") {
                continue;
            }
            let Some(gem_name) = Self::literal_argument(call, source) else {
                continue;
            };
            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "ruby",
                gem_name.clone(),
                gem_name.clone(),
                line_start(call),
                line_end(call),
                EntityKind::Import(ImportDetail {
                    source_module: gem_name,
                    ..Default::default()
                }),
            )
            .with_decorators(vec!["gem".to_string()]);
            result.entities.push(entity);
        }
    }

    /// Rake tasks become task entities with `ns1:ns2:task` qualified names.
    fn extract_rake(
        &self,
        node: Node,
        ctx: &ExtractionContext<'_>,
        namespaces: &[String],
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() != "call" {
                self.extract_rake(child, ctx, namespaces, result);
                continue;
            }
            match Self::method_name_of(child, source).as_deref() {
                Some("namespace") => {
                    if let Some(ns) = Self::literal_argument(child, source) {
                        let mut nested = namespaces.to_vec();
                        nested.push(ns);
                        if let Some(block) = find_child(child, "do_block")
                            .or_else(|| find_child(child, "block"))
                        {
                            self.extract_rake(block, ctx, &nested, result);
                        }
                    }
                }
                Some("task") => {
                    let task_name = Self::literal_argument(child, source)
                        // task :name => [:deps] parses the name from the pair
                        .or_else(|| {
                            find_descendants(child, "simple_symbol")
                                .first()
                                .map(|s| node_text(*s, source).trim_start_matches(':').to_string())
                        });
                    if let Some(task_name) = task_name {
                        let mut parts = namespaces.to_vec();
                        parts.push(task_name.clone());
                        let qualified = parts.join(":");
                        let entity = CodeEntity::new(
                            ctx.repository_id,
                            ctx.file_id,
                            "ruby",
                            task_name,
                            qualified,
                            line_start(child),
                            line_end(child),
                            EntityKind::Task(FunctionDetail::default()),
                        )
                        .with_decorators(vec!["task".to_string()])
                        .with_source_text(node_text(child, source));
                        result.entities.push(entity);
                    }
                }
                _ => {
                    self.extract_rake(child, ctx, namespaces, result);
                }
            }
        }
    }

    /// The nearest enclosing RSpec group or shared block of a call node.
    /// Members attach to it, not to every ancestor group.
    fn nearest_rspec_group<'t>(node: Node<'t>, source: &[u8]) -> Option<Node<'t>> {
        let mut current = node.parent();
        while let Some(parent) = current {
            if parent.kind() == "call"
                && let Some(method) = Self::method_name_of(parent, source)
                && (RSPEC_GROUPS.contains(&method.as_str())
                    || RSPEC_SHARED.contains(&method.as_str()))
            {
                return Some(parent);
            }
            current = parent.parent();
        }
        None
    }

    /// RSpec example groups are classes decorated with the group keyword;
    /// a constant argument also emits a references edge. Shared example
    /// blocks are functions. Group members: `it`/`specify` examples are
    /// methods decorated `example`, `let`/`let!`/`subject` bindings are
    /// variables, `before`/`after`/`around` hooks are methods named
    /// `hook_scope`.
    fn extract_rspec_groups(
        &self,
        root: Node,
        ctx: &ExtractionContext<'_>,
        module: &str,
        result: &mut ExtractionResult,
    ) {
        let source = ctx.source;
        for call in find_descendants(root, "call") {
            let Some(method) = Self::method_name_of(call, source) else {
                continue;
            };
            let is_group = RSPEC_GROUPS.contains(&method.as_str());
            let is_shared = RSPEC_SHARED.contains(&method.as_str());
            if !is_group && !is_shared {
                continue;
            }
            let Some(subject) = Self::literal_argument(call, source) else {
                continue;
            };
            let is_constant = subject.chars().next().is_some_and(char::is_uppercase);
            let qualified = build_qualified_name(&subject, None, Some(module), ".");

            let kind = if is_shared {
                EntityKind::Function(FunctionDetail::default())
            } else {
                EntityKind::Class(ClassDetail::default())
            };
            let entity = CodeEntity::new(
                ctx.repository_id,
                ctx.file_id,
                "ruby",
                subject.clone(),
                qualified.clone(),
                line_start(call),
                line_end(call),
                kind,
            )
            .with_decorators(vec![method.clone()]);

            if is_group && is_constant {
                result.pending_references.push(PendingRef {
                    source_entity_id: entity.id,
                    source_qualified_name: qualified.clone(),
                    target_qualified_name: subject,
                    relation_type: RelationType::References,
                    line_number: Some(line_start(call)),
                    context_snippet: Some(source_line(call, source)),
                    receiver_expr: None,
                });
            }

            if let Some(block) =
                find_child(call, "do_block").or_else(|| find_child(call, "block"))
            {
                for inner in find_descendants(block, "call") {
                    // Nested groups collect their own members
                    if !Self::nearest_rspec_group(inner, source)
                        .is_some_and(|group| group.id() == call.id())
                    {
                        continue;
                    }
                    let Some(inner_method) = Self::method_name_of(inner, source) else {
                        continue;
                    };
                    match inner_method.as_str() {
                        "it" | "specify" => {
                            let Some(label) = Self::literal_argument(inner, source) else {
                                continue;
                            };
                            let example = CodeEntity::new(
                                ctx.repository_id,
                                ctx.file_id,
                                "ruby",
                                label.clone(),
                                build_qualified_name(&label, Some(&qualified), None, "."),
                                line_start(inner),
                                line_end(inner),
                                EntityKind::Method(MethodDetail {
                                    parent_class: entity.name.clone(),
                                    ..Default::default()
                                }),
                            )
                            .with_decorators(vec![
                                inner_method.clone(),
                                "example".to_string(),
                            ]);
                            result.entities.push(example);
                        }
                        "let" | "let!" | "subject" => {
                            // subject may appear with a bare block and no name
                            let label = match Self::literal_argument(inner, source) {
                                Some(label) => label,
                                None if inner_method == "subject" => "subject".to_string(),
                                None => continue,
                            };
                            let binding = CodeEntity::new(
                                ctx.repository_id,
                                ctx.file_id,
                                "ruby",
                                label.clone(),
                                build_qualified_name(&label, Some(&qualified), None, "."),
                                line_start(inner),
                                line_end(inner),
                                EntityKind::Variable(VariableDetail::default()),
                            )
                            .with_decorators(vec![inner_method.clone()]);
                            result.entities.push(binding);
                        }
                        hook if RSPEC_HOOKS.contains(&hook) => {
                            let scope = Self::literal_argument(inner, source)
                                .unwrap_or_else(|| "each".to_string());
                            let name = format!("{hook}_{scope}");
                            let hook_entity = CodeEntity::new(
                                ctx.repository_id,
                                ctx.file_id,
                                "ruby",
                                name.clone(),
                                build_qualified_name(&name, Some(&qualified), None, "."),
                                line_start(inner),
                                line_end(inner),
                                EntityKind::Method(MethodDetail {
                                    parent_class: entity.name.clone(),
                                    ..Default::default()
                                }),
                            )
                            .with_decorators(vec![hook.to_string()]);
                            result.entities.push(hook_entity);
                        }
                        "it_behaves_like" | "include_examples" => {
                            if let Some(shared) = Self::literal_argument(inner, source) {
                                result.pending_references.push(PendingRef {
                                    source_entity_id: entity.id,
                                    source_qualified_name: qualified.clone(),
                                    target_qualified_name: shared,
                                    relation_type: RelationType::References,
                                    line_number: Some(line_start(inner)),
                                    context_snippet: Some(source_line(inner, source)),
                                    receiver_expr: None,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            result.entities.push(entity);
        }
    }
}

impl Extractor for RubyExtractor {
    fn language(&self) -> &'static str {
        "ruby"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["rb", "rake", "gemspec"])
            || has_file_name(path, &["Rakefile", "Gemfile"])
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

        if Self::is_gemfile(ctx.file_path) {
            self.extract_gemfile(root, ctx, &mut result);
        } else if Self::is_rakefile(ctx.file_path) {
            self.extract_rake(root, ctx, &[], &mut result);
        } else {
            self.extract_requires(root, ctx, &mut result);
            self.extract_rspec_groups(root, ctx, &module, &mut result);

            let mut cursor = root.walk();
            for child in root.children(&mut cursor) {
                match child.kind() {
                    "class" => self.extract_class(child, ctx, &module, &mut result),
                    "module" => self.extract_module(child, ctx, &module, &mut result),
                    "method" => self.extract_function(child, ctx, &module, &mut result),
                    "assignment" => self.extract_constant(child, ctx, &module, &mut result),
                    _ => {}
                }
            }
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

    fn extract_named(code: &str, name: &str) -> ExtractionResult {
        let mut extractor = RubyExtractor::new().unwrap();
        let path = Path::new(name);
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    fn extract(code: &str) -> ExtractionResult {
        extract_named(code, "test_module.rb")
    }

    #[test]
    fn test_class_with_inheritance() {
        let code = r#"class AdminUser < User
  def admin_method
    puts "Admin"
  end
end
"#;
        let result = extract(code);
        let class = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Class)
            .unwrap();
        assert_eq!(class.name, "AdminUser");
        match &class.kind {
            EntityKind::Class(c) => assert_eq!(c.base_classes, vec!["User"]),
            other => panic!("expected class, got {other:?}"),
        }
        let extends = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Extends)
            .unwrap();
        assert_eq!(extends.target_qualified_name, "User");
    }

    #[test]
    fn test_module_is_module_entity() {
        let code = r#"module Helpers
  def help_method
    puts "Help"
  end
end
"#;
        let result = extract(code);
        let module = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Module)
            .unwrap();
        assert_eq!(module.name, "Helpers");
    }

    #[test]
    fn test_requires() {
        let code = "require 'json'\nrequire_relative 'user_service'\n";
        let result = extract(code);
        let imports: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(imports.len(), 2);

        let json = imports.iter().find(|e| e.name == "json").unwrap();
        match &json.kind {
            EntityKind::Import(i) => assert!(!i.is_relative),
            other => panic!("expected import, got {other:?}"),
        }
        let relative = imports.iter().find(|e| e.name == "user_service").unwrap();
        match &relative.kind {
            EntityKind::Import(i) => assert!(i.is_relative),
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_mixins_become_implements() {
        let code = r#"class Service
  include Comparable
  extend Enumerable
end
"#;
        let result = extract(code);
        let implements: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::Implements)
            .collect();
        assert_eq!(implements.len(), 2);
        let class = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Class)
            .unwrap();
        match &class.kind {
            EntityKind::Class(c) => {
                assert!(c.mixins.contains(&"Comparable".to_string()));
                assert!(c.mixins.contains(&"Enumerable".to_string()));
            }
            other => panic!("expected class, got {other:?}"),
        }
    }

    #[test]
    fn test_block_scoped_visibility() {
        let code = r#"class Account
  def balance
  end

  private

  def audit
  end
end
"#;
        let result = extract(code);
        let balance = result.entities.iter().find(|e| e.name == "balance").unwrap();
        assert_eq!(balance.visibility, Visibility::Public);
        let audit = result.entities.iter().find(|e| e.name == "audit").unwrap();
        assert_eq!(audit.visibility, Visibility::Private);
    }

    #[test]
    fn test_inline_visibility_targets_named_methods() {
        let code = r#"class Account
  def a
  end

  def b
  end

  private :a
end
"#;
        let result = extract(code);
        let a = result.entities.iter().find(|e| e.name == "a").unwrap();
        assert_eq!(a.visibility, Visibility::Private);
        let b = result.entities.iter().find(|e| e.name == "b").unwrap();
        assert_eq!(b.visibility, Visibility::Public);
    }

    #[test]
    fn test_dot_new_is_instantiation() {
        let code = r#"def build
  User.new("alice")
end
"#;
        let result = extract(code);
        let inst = result
            .pending_references
            .iter()
            .find(|r| r.relation_type == RelationType::Instantiates)
            .unwrap();
        assert_eq!(inst.target_qualified_name, "User");
    }

    #[test]
    fn test_constants_are_constant_variables() {
        let code = "MAX_RETRIES = 3\n";
        let result = extract(code);
        let constant = result
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Variable)
            .unwrap();
        assert_eq!(constant.name, "MAX_RETRIES");
        match &constant.kind {
            EntityKind::Variable(v) => assert!(v.is_constant),
            other => panic!("expected variable, got {other:?}"),
        }
    }

    #[test]
    fn test_attr_accessor_emits_property_methods() {
        let code = r#"class User
  attr_accessor :name, :email, :age
end
"#;
        let result = extract(code);
        let props: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Method)
            .collect();
        assert_eq!(props.len(), 3);
        for prop in props {
            match &prop.kind {
                EntityKind::Method(m) => assert!(m.is_property),
                other => panic!("expected method, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_rspec_describe_is_decorated_class() {
        let code = r#"describe UserService do
  it "creates a user" do
    expect(true).to be_truthy
  end

  it_behaves_like "an auditable model"
end
"#;
        let result = extract_named(code, "user_service_spec.rb");
        let group = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"describe".to_string()))
            .unwrap();
        assert_eq!(group.name, "UserService");
        assert_eq!(group.entity_type, EntityType::Class);

        // Constant subject emits a references edge
        assert!(result.pending_references.iter().any(|r| {
            r.relation_type == RelationType::References
                && r.target_qualified_name == "UserService"
        }));

        let example = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"it".to_string()))
            .unwrap();
        assert_eq!(example.name, "creates a user");
        assert!(example.decorators.contains(&"example".to_string()));

        assert!(result.pending_references.iter().any(|r| {
            r.relation_type == RelationType::References
                && r.target_qualified_name == "an auditable model"
        }));
    }

    #[test]
    fn test_rspec_specify_normalized_to_example() {
        let code = r#"describe Calculator do
  specify "it works" do
  end
end
"#;
        let result = extract_named(code, "calculator_spec.rb");
        let example = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"example".to_string()))
            .unwrap();
        assert_eq!(example.name, "it works");
        assert_eq!(example.entity_type, EntityType::Method);
        match &example.kind {
            EntityKind::Method(m) => assert_eq!(m.parent_class, "Calculator"),
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn test_rspec_let_and_subject_are_variables() {
        let code = r#"describe User do
  let(:user) { User.new }
  let!(:account) { Account.create }
  subject { described_class.new }
end
"#;
        let result = extract_named(code, "user_spec.rb");

        let let_binding = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"let".to_string()))
            .unwrap();
        assert_eq!(let_binding.name, "user");
        assert_eq!(let_binding.entity_type, EntityType::Variable);

        let let_bang = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"let!".to_string()))
            .unwrap();
        assert_eq!(let_bang.name, "account");
        assert_eq!(let_bang.entity_type, EntityType::Variable);

        // Bare-block subject still produces a binding
        let subject = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"subject".to_string()))
            .unwrap();
        assert_eq!(subject.name, "subject");
        assert_eq!(subject.entity_type, EntityType::Variable);
    }

    #[test]
    fn test_rspec_shared_examples_is_function() {
        let code = r#"RSpec.shared_examples "a valid model" do
  it "is valid" do
  end
end
"#;
        let result = extract_named(code, "shared_spec.rb");
        let shared = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"shared_examples".to_string()))
            .unwrap();
        assert_eq!(shared.name, "a valid model");
        assert_eq!(shared.entity_type, EntityType::Function);

        // The example inside the shared block attaches to it
        let example = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"example".to_string()))
            .unwrap();
        assert_eq!(example.name, "is valid");
    }

    #[test]
    fn test_rspec_hooks_named_by_scope() {
        let code = r#"describe User do
  before(:each) do
    setup_db
  end

  after(:all) do
    cleanup
  end
end
"#;
        let result = extract_named(code, "user_spec.rb");

        let before = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"before".to_string()))
            .unwrap();
        assert_eq!(before.name, "before_each");
        assert_eq!(before.entity_type, EntityType::Method);

        let after = result
            .entities
            .iter()
            .find(|e| e.decorators.contains(&"after".to_string()))
            .unwrap();
        assert_eq!(after.name, "after_all");
    }

    #[test]
    fn test_rspec_nested_groups_keep_members_separate() {
        let code = r##"RSpec.describe User do
  describe "#save" do
    context "with valid data" do
      it "persists" do
      end
    end
  end
end
"##;
        let result = extract_named(code, "user_spec.rb");

        let groups: Vec<_> = result
            .entities
            .iter()
            .filter(|e| {
                e.decorators.contains(&"describe".to_string())
                    || e.decorators.contains(&"context".to_string())
            })
            .collect();
        assert_eq!(groups.len(), 3);

        // The example belongs to its nearest group only
        let examples: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.decorators.contains(&"example".to_string()))
            .collect();
        assert_eq!(examples.len(), 1);
        match &examples[0].kind {
            EntityKind::Method(m) => assert_eq!(m.parent_class, "with valid data"),
            other => panic!("expected method, got {other:?}"),
        }
    }

    #[test]
    fn test_rake_tasks_namespace_qualified() {
        let code = r#"namespace :db do
  namespace :schema do
    task :load do
      puts "loading"
    end
  end

  task :migrate do
    puts "migrating"
  end
end
"#;
        let result = extract_named(code, "Rakefile");
        let tasks: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Task)
            .collect();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().any(|t| t.qualified_name == "db:schema:load"));
        assert!(tasks.iter().any(|t| t.qualified_name == "db:migrate"));
    }

    #[test]
    fn test_gemfile_dependencies() {
        let code = r#"source "https://rubygems.org"

gem "rails", "~> 7.1"
gem "pg"
"#;
        let result = extract_named(code, "Gemfile");
        let gems: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(gems.len(), 2);
        assert!(gems.iter().any(|g| g.name == "rails"));
        assert!(gems.iter().any(|g| g.name == "pg"));
    }

    #[test]
    fn test_rails_association_reference() {
        let code = r#"class Post
  belongs_to :author
  has_many :comments
end
"#;
        let result = extract(code);
        let refs: Vec<_> = result
            .pending_references
            .iter()
            .filter(|r| r.relation_type == RelationType::References)
            .collect();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().any(|r| r.target_qualified_name == "Author"));
        assert!(refs.iter().any(|r| r.target_qualified_name == "Comment"));
    }
}
