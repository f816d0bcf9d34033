//! Concrete syntax tree → [`Template`].
//!
//! A pure pass over the tree from [`super::grammar`]: each statement is built from its
//! own node only, so nothing carries over between statements.

use super::error::Error;
use super::grammar::{Node, Rule};
use super::types::{Action, Entity, Expression, Params, Statement, Template, Value};

/// Build a template from a `Template` node parsed out of `source`.
pub fn build_template(source: &str, tree: &Node<'_>) -> Result<Template, Error> {
    let statements = tree
        .children
        .iter()
        .map(|node| build_statement(source, node))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Template::new(statements))
}

fn build_statement(source: &str, node: &Node<'_>) -> Result<Statement, Error> {
    let inner = node
        .children
        .first()
        .ok_or_else(|| malformed(source, node, "empty statement"))?;
    match inner.rule {
        Rule::Comment => Ok(Statement::Comment {
            text: inner.text.to_string(),
        }),
        Rule::Expr => Ok(Statement::Expression {
            expr: build_expression(source, inner)?,
        }),
        Rule::Declaration => {
            let ident = inner
                .child(Rule::Identifier)
                .ok_or_else(|| malformed(source, inner, "declaration without identifier"))?;
            let expr = inner
                .child(Rule::Expr)
                .ok_or_else(|| malformed(source, inner, "declaration without expression"))?;
            Ok(Statement::Declaration {
                ident: ident.text.to_string(),
                expr: build_expression(source, expr)?,
            })
        }
        _ => Err(malformed(source, inner, "unexpected statement node")),
    }
}

/// Shared by bare expressions and declaration right-hand sides.
fn build_expression(source: &str, node: &Node<'_>) -> Result<Expression, Error> {
    let action_node = node
        .child(Rule::Action)
        .ok_or_else(|| malformed(source, node, "expression without action"))?;
    let entity_node = node
        .child(Rule::Entity)
        .ok_or_else(|| malformed(source, node, "expression without entity"))?;

    let action: Action = action_node.text.parse().map_err(|_| {
        let (line, column) = action_node.position(source);
        Error::UnknownAction {
            action: action_node.text.to_string(),
            line,
            column,
        }
    })?;
    let entity: Entity = entity_node.text.parse().map_err(|_| {
        let (line, column) = entity_node.position(source);
        Error::UnknownEntity {
            entity: entity_node.text.to_string(),
            line,
            column,
        }
    })?;

    let mut params = Params::new();
    for param in node.children.iter().filter(|c| c.rule == Rule::Param) {
        let (key, value) = match param.children.as_slice() {
            [key, value] => (key, value),
            _ => return Err(malformed(source, param, "parameter without key and value")),
        };
        if params.contains_key(key.text) {
            let (line, column) = param.position(source);
            return Err(Error::Syntax {
                rule: "Param".to_string(),
                line,
                column,
                message: format!("duplicate parameter '{}'", key.text),
            });
        }
        params.insert(key.text.to_string(), build_value(source, value)?);
    }

    Ok(Expression {
        action,
        entity,
        params,
    })
}

/// Build a typed value from one of the value rules.
pub fn build_value(source: &str, node: &Node<'_>) -> Result<Value, Error> {
    let first_child = || {
        node.children
            .first()
            .map(|c| c.text.to_string())
            .ok_or_else(|| malformed(source, node, "value without body"))
    };
    match node.rule {
        Rule::CidrValue => Ok(Value::Cidr(node.text.to_string())),
        Rule::IpValue => Ok(Value::Ip(node.text.to_string())),
        Rule::CsvValue => Ok(Value::Csv(
            node.children.iter().map(|c| c.text.to_string()).collect(),
        )),
        Rule::IntRangeValue => match node.children.as_slice() {
            [lo, hi] => Ok(Value::IntRange(
                parse_int(source, lo)?,
                parse_int(source, hi)?,
            )),
            _ => Err(malformed(source, node, "range without two bounds")),
        },
        Rule::IntValue => Ok(Value::Int(parse_int(source, node)?)),
        Rule::RefValue => Ok(Value::Reference(first_child()?)),
        Rule::AliasValue => Ok(Value::Alias(first_child()?)),
        Rule::HoleValue => Ok(Value::Hole(first_child()?)),
        Rule::StringValue => Ok(Value::String(node.text.to_string())),
        _ => Err(malformed(source, node, "not a value")),
    }
}

fn parse_int(source: &str, node: &Node<'_>) -> Result<i64, Error> {
    node.text.parse::<i64>().map_err(|_| {
        let (line, column) = node.position(source);
        Error::Syntax {
            rule: "IntValue".to_string(),
            line,
            column,
            message: format!("integer {} out of range", node.text),
        }
    })
}

fn malformed(source: &str, node: &Node<'_>, message: &str) -> Error {
    let (line, column) = node.position(source);
    Error::Syntax {
        rule: format!("{:?}", node.rule),
        line,
        column,
        message: message.to_string(),
    }
}
