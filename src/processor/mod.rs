//! Queue processing and declaration derivation.
//!
//! This module provides:
//! - The tree-sitter visitor that turns source text into a declaration tree
//! - The index processor that drains the queue and reconciles stored symbols

mod parser;
mod processor;

pub use parser::{DeclarationParser, ParsedDeclaration};
pub use processor::{IndexProcessor, RunReport};
