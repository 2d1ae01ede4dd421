//! Embedding text construction.
//!
//! Builds one natural-language string per entity for the embedding
//! provider. The field order is fixed (type, name, qualified name,
//! signature, docstring, decorators, type information) so the text is
//! stable for a given entity.

use crate::model::{CodeEntity, EntityKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddingTextBuilder;

impl EmbeddingTextBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, entity: &CodeEntity) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(format!(
            "{} {} ({})",
            entity.entity_type, entity.name, entity.language
        ));
        parts.push(format!("qualified name: {}", entity.qualified_name));

        if let Some(signature) = &entity.signature {
            parts.push(format!("signature: {signature}"));
        }
        if let Some(docstring) = &entity.docstring {
            parts.push(format!("documentation: {docstring}"));
        }
        if !entity.decorators.is_empty() {
            parts.push(format!("decorators: {}", entity.decorators.join(", ")));
        }

        match &entity.kind {
            EntityKind::Class(c) | EntityKind::Interface(c) => {
                if !c.base_classes.is_empty() {
                    parts.push(format!("extends: {}", c.base_classes.join(", ")));
                }
                if !c.mixins.is_empty() {
                    parts.push(format!("mixins: {}", c.mixins.join(", ")));
                }
                if !c.method_names.is_empty() {
                    parts.push(format!("methods: {}", c.method_names.join(", ")));
                }
            }
            EntityKind::Function(f) | EntityKind::Task(f) => {
                if !f.parameters.is_empty() {
                    let params: Vec<String> = f
                        .parameters
                        .iter()
                        .map(|p| match &p.type_annotation {
                            Some(ty) => format!("{}: {ty}", p.name),
                            None => p.name.clone(),
                        })
                        .collect();
                    parts.push(format!("parameters: {}", params.join(", ")));
                }
                if let Some(ret) = &f.return_type {
                    parts.push(format!("returns: {ret}"));
                }
            }
            EntityKind::Method(m) => {
                parts.push(format!("member of: {}", m.parent_class));
                if !m.parameters.is_empty() {
                    let params: Vec<String> = m
                        .parameters
                        .iter()
                        .map(|p| match &p.type_annotation {
                            Some(ty) => format!("{}: {ty}", p.name),
                            None => p.name.clone(),
                        })
                        .collect();
                    parts.push(format!("parameters: {}", params.join(", ")));
                }
                if let Some(ret) = &m.return_type {
                    parts.push(format!("returns: {ret}"));
                }
            }
            EntityKind::Import(i) => {
                parts.push(format!("imports from: {}", i.source_module));
            }
            EntityKind::Variable(v) => {
                if let Some(ty) = &v.value_type {
                    parts.push(format!("type: {ty}"));
                }
            }
            EntityKind::Module | EntityKind::TypeAlias => {}
        }

        parts.join(". ")
    }
}
