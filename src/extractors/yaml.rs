//! YAML extractor.
//!
//! Emits a variable for each mapping key up to the configured depth;
//! nested keys produce dotted qualified names and list items index as
//! `name[i]`. Malformed documents report a single parse error; empty
//! documents yield zero entities and no error.

use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ExtractError;
use crate::model::{
    CodeEntity, EntityKind, ExtractionResult, ParseDiagnostic, ParseErrorKind, VariableDetail,
};

use super::{ExtractionContext, Extractor, has_extension};

pub struct YamlExtractor {
    max_depth: usize,
}

impl YamlExtractor {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn value_type_of(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some("bool".to_string()),
            Value::Number(_) => Some("number".to_string()),
            Value::String(_) => Some("string".to_string()),
            Value::Sequence(_) => Some("sequence".to_string()),
            Value::Mapping(_) => Some("mapping".to_string()),
            Value::Tagged(_) => Some("tagged".to_string()),
        }
    }

    fn walk(
        &self,
        value: &Value,
        prefix: &str,
        depth: usize,
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
    ) {
        if depth > self.max_depth {
            return;
        }
        match value {
            Value::Mapping(map) => {
                for (key, nested) in map {
                    let Some(key_str) = key.as_str().map(str::to_string).or_else(|| {
                        key.as_i64()
                            .map(|n| n.to_string())
                            .or_else(|| key.as_bool().map(|b| b.to_string()))
                    }) else {
                        continue;
                    };
                    let qualified = if prefix.is_empty() {
                        key_str.clone()
                    } else {
                        format!("{prefix}.{key_str}")
                    };

                    let entity = CodeEntity::new(
                        ctx.repository_id,
                        ctx.file_id,
                        "yaml",
                        key_str,
                        qualified.clone(),
                        1,
                        1,
                        EntityKind::Variable(VariableDetail {
                            is_constant: false,
                            value_type: Self::value_type_of(nested),
                        }),
                    );
                    result.entities.push(entity);
                    self.walk(nested, &qualified, depth + 1, ctx, result);
                }
            }
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let indexed = format!("{prefix}[{i}]");
                    if matches!(item, Value::Mapping(_) | Value::Sequence(_)) {
                        self.walk(item, &indexed, depth + 1, ctx, result);
                    } else {
                        let entity = CodeEntity::new(
                            ctx.repository_id,
                            ctx.file_id,
                            "yaml",
                            indexed.clone(),
                            indexed,
                            1,
                            1,
                            EntityKind::Variable(VariableDetail {
                                is_constant: false,
                                value_type: Self::value_type_of(item),
                            }),
                        );
                        result.entities.push(entity);
                    }
                }
            }
            _ => {}
        }
    }
}

impl Extractor for YamlExtractor {
    fn language(&self) -> &'static str {
        "yaml"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["yaml", "yml"])
    }

    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError> {
        let source = String::from_utf8_lossy(ctx.source);
        let mut result = ExtractionResult::new();

        if source.trim().is_empty() {
            return Ok(result);
        }

        // Multi-document streams are walked document by document
        for document in serde_yaml::Deserializer::from_str(&source) {
            match Value::deserialize(document) {
                Ok(value) => self.walk(&value, "", 1, ctx, &mut result),
                Err(_) => {
                    result.parse_errors.push(ParseDiagnostic {
                        line: 1,
                        column: 1,
                        kind: ParseErrorKind::Error,
                    });
                    return Ok(result);
                }
            }
        }
        Ok(result)
    }
}
