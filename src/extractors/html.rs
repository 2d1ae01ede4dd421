//! HTML extractor.
//!
//! Element ids, CSS classes, script sources, stylesheet/anchor hrefs, and
//! `data-*` attributes each become variables under namespaced qualified
//! names (`id:`, `class:`, `script:`, `link:`, `data:`).

use std::path::Path;

use regex::Regex;

use crate::error::ExtractError;
use crate::model::{CodeEntity, EntityKind, ExtractionResult, VariableDetail};

use super::{ExtractionContext, Extractor, has_extension};

pub struct HtmlExtractor {
    id_attr: Regex,
    class_attr: Regex,
    script_src: Regex,
    link_href: Regex,
    anchor_href: Regex,
    data_attr: Regex,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self {
            id_attr: Regex::new(r#"\bid\s*=\s*["']([^"']+)["']"#).expect("static regex"),
            class_attr: Regex::new(r#"\bclass\s*=\s*["']([^"']+)["']"#).expect("static regex"),
            script_src: Regex::new(r#"<script[^>]*\bsrc\s*=\s*["']([^"']+)["']"#)
                .expect("static regex"),
            link_href: Regex::new(r#"<link[^>]*\bhref\s*=\s*["']([^"']+)["']"#)
                .expect("static regex"),
            anchor_href: Regex::new(r#"<a[^>]*\bhref\s*=\s*["']([^"']+)["']"#)
                .expect("static regex"),
            data_attr: Regex::new(r#"\b(data-[\w-]+)\s*=\s*["'][^"']*["']"#)
                .expect("static regex"),
        }
    }

    fn push(
        ctx: &ExtractionContext<'_>,
        result: &mut ExtractionResult,
        namespace: &str,
        name: &str,
        line: u32,
    ) {
        let qualified = format!("{namespace}:{name}");
        if result.entities.iter().any(|e| e.qualified_name == qualified) {
            return;
        }
        let entity = CodeEntity::new(
            ctx.repository_id,
            ctx.file_id,
            "html",
            name,
            qualified,
            line,
            line,
            EntityKind::Variable(VariableDetail::default()),
        )
        .with_decorators(vec![namespace.to_string()]);
        result.entities.push(entity);
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for HtmlExtractor {
    fn language(&self) -> &'static str {
        "html"
    }

    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["html", "htm"])
    }

    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError> {
        let source = String::from_utf8_lossy(ctx.source);
        let mut result = ExtractionResult::new();

        for (idx, line) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;

            for caps in self.id_attr.captures_iter(line) {
                Self::push(ctx, &mut result, "id", &caps[1], line_no);
            }
            for caps in self.class_attr.captures_iter(line) {
                // class="btn btn-primary" lists several classes
                for class in caps[1].split_whitespace() {
                    Self::push(ctx, &mut result, "class", class, line_no);
                }
            }
            for caps in self.script_src.captures_iter(line) {
                Self::push(ctx, &mut result, "script", &caps[1], line_no);
            }
            for caps in self.link_href.captures_iter(line) {
                Self::push(ctx, &mut result, "link", &caps[1], line_no);
            }
            for caps in self.anchor_href.captures_iter(line) {
                Self::push(ctx, &mut result, "link", &caps[1], line_no);
            }
            for caps in self.data_attr.captures_iter(line) {
                Self::push(ctx, &mut result, "data", &caps[1], line_no);
            }
        }
        Ok(result)
    }
}
