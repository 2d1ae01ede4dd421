//! Dockerfile extractor.
//!
//! Line-oriented: `FROM` is an import (stage aliases recorded), `ENV`/
//! `ARG`/`EXPOSE` are variables, `ENTRYPOINT`/`CMD` are functions named
//! `entrypoint`/`cmd` with the command vector in the docstring.

use std::path::Path;

use crate::error::ExtractError;
use crate::model::{
    CodeEntity, EntityKind, ExtractionResult, FunctionDetail, ImportDetail, VariableDetail,
};

use super::{ExtractionContext, Extractor, has_file_name};

pub struct DockerfileExtractor;

impl DockerfileExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Logical lines with backslash continuations folded, paired with their
    /// 1-based starting line numbers.
    fn logical_lines(source: &str) -> Vec<(u32, String)> {
        let mut lines = Vec::new();
        let mut pending: Option<(u32, String)> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw.trim();
            match pending.take() {
                Some((start, mut acc)) => {
                    if let Some(stripped) = trimmed.strip_suffix('\\') {
                        acc.push(' ');
                        acc.push_str(stripped.trim());
                        pending = Some((start, acc));
                    } else {
                        acc.push(' ');
                        acc.push_str(trimmed);
                        lines.push((start, acc));
                    }
                }
                None => {
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    if let Some(stripped) = trimmed.strip_suffix('\\') {
                        pending = Some((line_no, stripped.trim().to_string()));
                    } else {
                        lines.push((line_no, trimmed.to_string()));
                    }
                }
            }
        }
        if let Some(entry) = pending {
            lines.push(entry);
        }
        lines
    }

    fn push_variable(
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
        name: &str,
        value: Option<&str>,
        line: u32,
        instruction: &str,
    ) {
        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "dockerfile",
            name,
            name,
            line,
            line,
            EntityKind::Variable(VariableDetail {
                is_constant: false,
                value_type: value.map(str::to_string),
            }),
        )
        .with_decorators(vec![instruction.to_string()]);
        result.entities.push(entity);
    }
}

impl Default for DockerfileExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for DockerfileExtractor {
    fn language(&self) -> &'static str {
        "dockerfile"
    }

    fn supports(&self, path: &Path) -> bool {
        if has_file_name(path, &["Dockerfile", "Containerfile"]) {
            return true;
        }
        // Dockerfile.dev, Dockerfile.prod, ...
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with("Dockerfile."))
    }

    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError> {
        let source = String::from_utf8_lossy(ctx.source);
        let mut result = ExtractionResult::new();

        for (line, text) in Self::logical_lines(&source) {
            let Some((instruction, rest)) = text.split_once(char::is_whitespace) else {
                continue;
            };
            let rest = rest.trim();
            match instruction.to_ascii_uppercase().as_str() {
                "FROM" => {
                    let mut parts = rest.split_whitespace();
                    let Some(image) = parts.next() else { continue };
                    let mut stage_alias = None;
                    if let Some(keyword) = parts.next()
                        && keyword.eq_ignore_ascii_case("as")
                    {
                        stage_alias = parts.next().map(str::to_string);
                    }
                    let entity = CodeEntity::new(
                        ctx.repository_id,
                        ctx.file_id,
                        "dockerfile",
                        image,
                        image,
                        line,
                        line,
                        EntityKind::Import(ImportDetail {
                            source_module: image.to_string(),
                            imported_symbols: stage_alias.into_iter().collect(),
                            ..Default::default()
                        }),
                    );
                    result.entities.push(entity);
                }
                "ENV" | "ARG" => {
                    // ENV KEY=value, ENV KEY value, and ARG KEY forms
                    if let Some((key, value)) = rest.split_once('=') {
                        Self::push_variable(
                            ctx,
                            &mut result,
                            key.trim(),
                            Some(value.trim()),
                            line,
                            instruction,
                        );
                    } else if let Some((key, value)) = rest.split_once(char::is_whitespace) {
                        Self::push_variable(
                            ctx,
                            &mut result,
                            key.trim(),
                            Some(value.trim()),
                            line,
                            instruction,
                        );
                    } else if !rest.is_empty() {
                        Self::push_variable(ctx, &mut result, rest, None, line, instruction);
                    }
                }
                "EXPOSE" => {
                    for port in rest.split_whitespace() {
                        Self::push_variable(ctx, &mut result, port, None, line, "EXPOSE");
                    }
                }
                "ENTRYPOINT" | "CMD" => {
                    let name = if instruction.eq_ignore_ascii_case("ENTRYPOINT") {
                        "entrypoint"
                    } else {
                        "cmd"
                    };
                    let entity = CodeEntity::new(
                        ctx.repository_id,
                        ctx.file_id,
                        "dockerfile",
                        name,
                        name,
                        line,
                        line,
                        EntityKind::Function(FunctionDetail::default()),
                    )
                    .with_docstring(Some(rest.to_string()));
                    result.entities.push(entity);
                }
                _ => {}
            }
        }
        Ok(result)
    }
}
