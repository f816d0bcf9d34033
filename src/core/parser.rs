//! Template parsing and lint.
//!
//! Parsing is two passes: [`grammar`](super::grammar) recognizes the text into a
//! concrete syntax tree, then [`builder`](super::builder) turns the tree into a
//! [`Template`]. `validate_template` checks a parsed template without running it:
//! - References must name an identifier declared on an earlier statement
//! - Identifiers should be declared once

use super::builder::{build_template, build_value};
use super::error::Error;
use super::grammar::{parse_template_tree, parse_value_tree};
use super::types::*;
use std::collections::HashMap;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a template file from disk.
pub fn parse_template_file(path: &Path) -> Result<Template, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_template(&content)
}

/// Parse template text.
pub fn parse_template(source: &str) -> Result<Template, Error> {
    let tree = parse_template_tree(source)?;
    let template = build_template(source, &tree)?;
    tracing::debug!(statements = template.len(), "parsed template");
    Ok(template)
}

/// Classify one literal by the grammar's precedence rules.
pub fn parse_value(text: &str) -> Result<Value, Error> {
    let text = text.trim();
    let node = parse_value_tree(text)?;
    build_value(text, &node)
}

/// Lint a parsed template. Returns a list of errors (empty = valid).
pub fn validate_template(template: &Template) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut declared: HashMap<&str, usize> = HashMap::new();

    for (i, statement) in template.statements.iter().enumerate() {
        let index = i + 1;
        let Some(expr) = statement.expression() else {
            continue;
        };

        // References resolve only against strictly earlier declarations
        for (key, value) in &expr.params {
            if let Value::Reference(id) = value {
                if !declared.contains_key(id.as_str()) {
                    errors.push(ValidationError {
                        message: format!(
                            "statement {} ({} {}): parameter '{}' references ${} which is not declared earlier",
                            index, expr.action, expr.entity, key, id
                        ),
                    });
                }
            }
        }

        if let Some(ident) = statement.declared_identifier() {
            if let Some(first) = declared.insert(ident, index) {
                errors.push(ValidationError {
                    message: format!(
                        "statement {}: identifier '{}' redeclared (first declared at statement {})",
                        index, ident, first
                    ),
                });
            }
        }
    }

    errors
}
