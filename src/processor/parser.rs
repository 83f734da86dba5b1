//! Declaration tree parsing with tree-sitter.
//!
//! Walks namespace declarations, then classes within them, then
//! methods/properties within classes, then parameters within methods.
//! Anything outside the closed kind set is ignored. Line numbers are
//! zero-based, end-inclusive spans from the parser's location info.

use tree_sitter::Node;

use crate::error::ProcessorError;
use crate::storage::DeclKind;
use crate::Result;

/// One parsed declaration with its nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDeclaration {
    pub kind: DeclKind,
    pub name: String,
    pub line_start: i64,
    pub line_end: i64,
    pub children: Vec<ParsedDeclaration>,
}

/// Parser for C# source files.
///
/// Holds a tree-sitter parser instance; create one per processing run.
pub struct DeclarationParser {
    parser: tree_sitter::Parser,
}

impl DeclarationParser {
    /// Create a parser with the C# grammar loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the grammar version is incompatible.
    pub fn new() -> Result<Self> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_c_sharp::LANGUAGE.into())
            .map_err(|e| ProcessorError::Parse(format!("failed to load grammar: {e}")))?;
        Ok(Self { parser })
    }

    /// Parse source text into a declaration tree.
    ///
    /// A file is always fully re-parsed; malformed regions simply
    /// contribute no declarations.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError::Parse` if the parser produces no tree.
    pub fn parse(&mut self, source: &str) -> Result<Vec<ParsedDeclaration>> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ProcessorError::Parse("parser produced no tree".to_string()))?;

        Ok(collect_scope(tree.root_node(), source.as_bytes()))
    }
}

fn span(node: Node<'_>) -> (i64, i64) {
    let start = i64::try_from(node.start_position().row).unwrap_or(0);
    let end = i64::try_from(node.end_position().row).unwrap_or(0);
    (start, end)
}

fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

/// Collect declarations from the named children of a scope node.
///
/// `declaration_list` bodies are transparent: their members belong to
/// the enclosing declaration.
fn collect_scope(node: Node<'_>, source: &[u8]) -> Vec<ParsedDeclaration> {
    let mut out = Vec::new();
    let mut cursor = node.walk();

    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "namespace_declaration" | "file_scoped_namespace_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    let (line_start, line_end) = span(child);
                    out.push(ParsedDeclaration {
                        kind: DeclKind::Namespace,
                        name,
                        line_start,
                        line_end,
                        children: collect_scope(child, source),
                    });
                }
            }
            "class_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    let (line_start, line_end) = span(child);
                    out.push(ParsedDeclaration {
                        kind: DeclKind::Class,
                        name,
                        line_start,
                        line_end,
                        children: collect_scope(child, source),
                    });
                }
            }
            "method_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    let (line_start, line_end) = span(child);
                    out.push(ParsedDeclaration {
                        kind: DeclKind::Method,
                        name,
                        line_start,
                        line_end,
                        children: collect_parameters(child, source),
                    });
                }
            }
            "property_declaration" => {
                if let Some(name) = field_text(child, "name", source) {
                    let (line_start, line_end) = span(child);
                    out.push(ParsedDeclaration {
                        kind: DeclKind::Property,
                        name,
                        line_start,
                        line_end,
                        children: Vec::new(),
                    });
                }
            }
            "declaration_list" => out.extend(collect_scope(child, source)),
            _ => {}
        }
    }

    out
}

fn collect_parameters(method: Node<'_>, source: &[u8]) -> Vec<ParsedDeclaration> {
    let Some(list) = method.child_by_field_name("parameters") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut cursor = list.walk();

    for child in list.named_children(&mut cursor) {
        if child.kind() == "parameter" {
            if let Some(name) = field_text(child, "name", source) {
                let (line_start, line_end) = span(child);
                out.push(ParsedDeclaration {
                    kind: DeclKind::Parameter,
                    name,
                    line_start,
                    line_end,
                    children: Vec::new(),
                });
            }
        }
    }

    out
}
