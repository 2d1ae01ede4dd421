//! Shared tree-sitter traversal helpers used by the language extractors.

use tree_sitter::{Language, Node, Parser};

use crate::error::ExtractError;
use crate::model::{ParseDiagnostic, ParseErrorKind};

/// Build a parser for a grammar, with a readable error on failure.
pub fn new_parser(language: &Language, name: &str) -> Result<Parser, ExtractError> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| ExtractError::ParserInit {
            language: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(parser)
}

/// Text content of a node, lossy-decoded.
pub fn node_text(node: Node, source: &[u8]) -> String {
    String::from_utf8_lossy(&source[node.byte_range()]).into_owned()
}

/// First direct child of the given kind.
pub fn find_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

/// All direct children of the given kind.
pub fn find_children<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.kind() == kind)
        .collect()
}

/// All descendants of the given kind, depth-first.
pub fn find_descendants<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut results = Vec::new();
    collect_descendants(node, kind, &mut results);
    results
}

fn collect_descendants<'t>(node: Node<'t>, kind: &str, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == kind {
            out.push(child);
        }
        collect_descendants(child, kind, out);
    }
}

/// 1-based start line of a node.
pub fn line_start(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line of a node.
pub fn line_end(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// The trimmed source line where a node starts, for context snippets.
pub fn source_line(node: Node, source: &[u8]) -> String {
    let row = node.start_position().row;
    source
        .split(|b| *b == b'\n')
        .nth(row)
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default()
}

/// Walk the tree and collect ERROR / MISSING node locations (1-based).
pub fn collect_parse_errors(root: Node) -> Vec<ParseDiagnostic> {
    let mut errors = Vec::new();
    walk_errors(root, &mut errors);
    errors
}

fn walk_errors(node: Node, errors: &mut Vec<ParseDiagnostic>) {
    if node.kind() == "ERROR" {
        errors.push(ParseDiagnostic {
            line: node.start_position().row as u32 + 1,
            column: node.start_position().column as u32 + 1,
            kind: ParseErrorKind::Error,
        });
    } else if node.is_missing() {
        errors.push(ParseDiagnostic {
            line: node.start_position().row as u32 + 1,
            column: node.start_position().column as u32 + 1,
            kind: ParseErrorKind::Missing,
        });
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_errors(child, errors);
        }
    }
}

/// Leading comment block adjacent to a definition, for languages that carry
/// documentation in line comments (`///`, `//`, `#`). Collects the
/// contiguous run of sibling comments immediately above the node, strips
/// the markers, and joins the lines.
pub fn leading_comment_doc(node: Node, source: &[u8], markers: &[&str]) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = node.prev_sibling();
    // Decorated definitions keep their comments above the decorator
    while let Some(sibling) = current {
        if !sibling.kind().contains("comment") {
            break;
        }
        let text = node_text(sibling, source);
        let stripped = strip_comment_markers(&text, markers);
        lines.push(stripped);
        current = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let doc = lines.join("\n").trim().to_string();
    if doc.is_empty() { None } else { Some(doc) }
}

fn strip_comment_markers(text: &str, markers: &[&str]) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            let mut best = trimmed;
            for marker in markers {
                if let Some(rest) = trimmed.strip_prefix(marker) {
                    best = rest.trim_start();
                    break;
                }
            }
            best.trim_end_matches("*/").trim()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Strip `/** ... */` block comment framing.
pub fn strip_block_comment(text: &str) -> String {
    text.trim()
        .trim_start_matches("/**")
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
