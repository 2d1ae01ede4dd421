//! Markdown extractor.
//!
//! Headings form a hierarchy whose qualified name is the dotted path of
//! ancestor heading texts. Fenced code blocks become variables carrying the
//! language tag. Inline, reference, and image links become imports
//! (relative unless the target is an absolute URL).

use std::path::Path;

use regex::Regex;

use crate::error::ExtractError;
use crate::model::{
    CodeEntity, EntityKind, ExtractionResult, ImportDetail, VariableDetail,
};

use super::{ExtractionContext, Extractor, has_extension};

pub struct MarkdownExtractor {
    inline_link: Regex,
    reference_def: Regex,
}

impl MarkdownExtractor {
    pub fn new() -> Self {
        Self {
            // [text](target) and ![alt](target)
            inline_link: Regex::new(r"!?\[([^\]]*)\]\(([^)\s]+)[^)]*\)").expect("static regex"),
            // [label]: target
            reference_def: Regex::new(r"^\s*\[([^\]]+)\]:\s*(\S+)").expect("static regex"),
        }
    }

    fn is_absolute_url(target: &str) -> bool {
        target.starts_with("http://")
            || target.starts_with("https://")
            || target.starts_with("ftp://")
            || target.starts_with("mailto:")
    }

    fn push_link(
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
        label: &str,
        target: &str,
        line: u32,
    ) {
        let name = if label.is_empty() { target } else { label };
        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "markdown",
            name,
            target,
            line,
            line,
            EntityKind::Import(ImportDetail {
                source_module: target.to_string(),
                is_relative: !Self::is_absolute_url(target),
                ..Default::default()
            }),
        );
        result.entities.push(entity);
    }
}

impl Default for MarkdownExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for MarkdownExtractor {
    fn language(&self) -> &'static str {
        "markdown"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["md", "markdown"])
    }

    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError> {
        let source = String::from_utf8_lossy(ctx.source);
        let mut result = ExtractionResult::new();

        // Heading text per level, for building the dotted ancestor path
        let mut heading_stack: Vec<(usize, String)> = Vec::new();
        let mut in_code_block = false;
        let mut code_block_lang = String::new();
        let mut code_block_start = 0u32;
        let mut code_block_count = 0usize;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw.trim_end();

            if let Some(fence_rest) = trimmed.trim_start().strip_prefix("```") {
                if in_code_block {
                    // Closing fence: emit the block collected since the opener
                    code_block_count += 1;
                    let name = format!("code_block_{code_block_count}");
                    let qualified = match heading_stack.last() {
                        Some((_, _)) => {
                            let path: Vec<&str> =
                                heading_stack.iter().map(|(_, t)| t.as_str()).collect();
                            format!("{}.{name}", path.join("."))
                        }
                        None => name.clone(),
                    };
                    let mut entity = CodeEntity::new(
                        ctx.repository_id,
                        ctx.file_id,
                        "markdown",
                        name,
                        qualified,
                        code_block_start,
                        line_no,
                        EntityKind::Variable(VariableDetail {
                            is_constant: false,
                            value_type: if code_block_lang.is_empty() {
                                None
                            } else {
                                Some(code_block_lang.clone())
                            },
                        }),
                    );
                    if !code_block_lang.is_empty() {
                        entity.decorators = vec![code_block_lang.clone()];
                    }
                    result.entities.push(entity);
                    in_code_block = false;
                    code_block_lang.clear();
                } else {
                    in_code_block = true;
                    code_block_lang = fence_rest.trim().to_string();
                    code_block_start = line_no;
                }
                continue;
            }
            if in_code_block {
                continue;
            }

            // Headings
            if trimmed.starts_with('#') {
                let level = trimmed.chars().take_while(|c| *c == '#').count();
                let text = trimmed[level..].trim().to_string();
                if !text.is_empty() && level <= 6 {
                    heading_stack.retain(|(l, _)| *l < level);
                    let qualified = if heading_stack.is_empty() {
                        text.clone()
                    } else {
                        let path: Vec<&str> =
                            heading_stack.iter().map(|(_, t)| t.as_str()).collect();
                        format!("{}.{text}", path.join("."))
                    };
                    heading_stack.push((level, text.clone()));

                    let entity = CodeEntity::new(
                        ctx.repository_id,
                        ctx.file_id,
                        "markdown",
                        text,
                        qualified,
                        line_no,
                        line_no,
                        EntityKind::Variable(VariableDetail::default()),
                    )
                    .with_decorators(vec![format!("h{level}")]);
                    result.entities.push(entity);
                    continue;
                }
            }

            // Reference-style link definitions
            if let Some(caps) = self.reference_def.captures(trimmed) {
                Self::push_link(ctx, &mut result, &caps[1], &caps[2], line_no);
                continue;
            }

            // Inline and image links
            for caps in self.inline_link.captures_iter(trimmed) {
                Self::push_link(ctx, &mut result, &caps[1], &caps[2], line_no);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use uuid::Uuid;

    fn extract(code: &str) -> ExtractionResult {
        let mut extractor = MarkdownExtractor::new();
        let path = Path::new("README.md");
        let ctx = ExtractionContext {
            file_path: path,
            file_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            source: code.as_bytes(),
        };
        extractor.extract(&ctx).unwrap()
    }

    #[test]
    fn test_heading_hierarchy() {
        let code = "# Main Title\n\n## Overview\n\nText.\n\n## Details\n\n### Deep\n";
        let result = extract(code);

        let overview = result
            .entities
            .iter()
            .find(|e| e.name == "Overview")
            .unwrap();
        assert_eq!(overview.qualified_name, "Main Title.Overview");

        let deep = result.entities.iter().find(|e| e.name == "Deep").unwrap();
        assert_eq!(deep.qualified_name, "Main Title.Details.Deep");

        let title = result
            .entities
            .iter()
            .find(|e| e.name == "Main Title")
            .unwrap();
        assert_eq!(title.qualified_name, "Main Title");
        assert_eq!(title.decorators, vec!["h1"]);
    }

    #[test]
    fn test_fenced_code_block_with_language() {
        let code = "# Doc\n\n```rust\nfn main() {}\n```\n";
        let result = extract(code);
        let block = result
            .entities
            .iter()
            .find(|e| e.name.starts_with("code_block"))
            .unwrap();
        assert_eq!(block.entity_type, EntityType::Variable);
        assert_eq!(block.decorators, vec!["rust"]);
        match &block.kind {
            EntityKind::Variable(v) => assert_eq!(v.value_type.as_deref(), Some("rust")),
            other => panic!("expected variable, got {other:?}"),
        }
    }

    #[test]
    fn test_inline_and_image_links() {
        let code = "See [OpenAI](https://openai.com/docs) and ![logo](./img/logo.png).\n";
        let result = extract(code);
        let links: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Import)
            .collect();
        assert_eq!(links.len(), 2);

        let absolute = links.iter().find(|e| e.name == "OpenAI").unwrap();
        match &absolute.kind {
            EntityKind::Import(i) => {
                assert_eq!(i.source_module, "https://openai.com/docs");
                assert!(!i.is_relative);
            }
            other => panic!("expected import, got {other:?}"),
        }

        let relative = links.iter().find(|e| e.name == "logo").unwrap();
        match &relative.kind {
            EntityKind::Import(i) => assert!(i.is_relative),
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_link_definition() {
        let code = "Text with [a link][ref].\n\n[ref]: https://example.com/page\n";
        let result = extract(code);
        assert!(result.entities.iter().any(|e| {
            matches!(&e.kind, EntityKind::Import(i) if i.source_module == "https://example.com/page")
        }));
    }

    #[test]
    fn test_headings_inside_code_blocks_ignored() {
        let code = "# Real\n\n```\n# not a heading\n```\n";
        let result = extract(code);
        let headings: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.decorators.iter().any(|d| d.starts_with('h')))
            .collect();
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].name, "Real");
    }
}
