//! Template grammar: nom parsers producing a generic concrete syntax tree.
//!
//! The tree carries only rules and source slices; [`super::builder`] turns it into a
//! [`super::types::Template`] in a separate pass.
//!
//! ```text
//! Template    = Statement+
//! Statement   = WS (Expr | Declaration | Comment) WS Comment? EOL
//! Declaration = Identifier '=' Expr
//! Expr        = Action WS Entity (WS Param)*
//! Param       = Identifier '=' Value
//! Value       = Cidr / Ip / Csv / IntRange / Int / '$'Ref / '@'Alias / '{'Hole'}' / String
//! ```
//!
//! Every value alternative must be followed by a value terminator (blank, line end,
//! `#` or end of input), so `1.2.3.4x` is a String rather than an IP plus junk.

use super::error::Error;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, not_line_ending, one_of, space0, space1};
use nom::combinator::{all_consuming, cut, eof, map, peek, recognize, value};
use nom::error::{context, VerboseError, VerboseErrorKind};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::{IResult, Offset};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Grammar rule that produced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Template,
    Statement,
    Declaration,
    Expr,
    Action,
    Entity,
    Param,
    Identifier,
    CidrValue,
    IpValue,
    CsvValue,
    IntRangeValue,
    IntValue,
    RefValue,
    AliasValue,
    HoleValue,
    StringValue,
    Comment,
}

/// Concrete syntax tree node: a rule, the exact source slice it matched, and its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    pub rule: Rule,
    pub text: &'a str,
    pub children: Vec<Node<'a>>,
}

impl<'a> Node<'a> {
    fn leaf(rule: Rule, text: &'a str) -> Self {
        Self {
            rule,
            text,
            children: Vec::new(),
        }
    }

    fn branch(rule: Rule, text: &'a str, children: Vec<Node<'a>>) -> Self {
        Self {
            rule,
            text,
            children,
        }
    }

    /// First child produced by `rule`.
    pub fn child(&self, rule: Rule) -> Option<&Node<'a>> {
        self.children.iter().find(|c| c.rule == rule)
    }

    /// 1-based line and column of this node within `source`.
    ///
    /// `source` must be the text the node was parsed from.
    pub fn position(&self, source: &str) -> (usize, usize) {
        line_column(source, source.offset(self.text))
    }
}

/// 1-based line/column for a byte offset. `\r\n`, `\r` and `\n` each end a line.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let (mut line, mut column) = (1, 1);
    for (i, c) in before.char_indices() {
        match c {
            '\r' if source[i + 1..].starts_with('\n') => {}
            '\r' | '\n' => {
                line += 1;
                column = 1;
            }
            _ => column += 1,
        }
    }
    (line, column)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_string_char(c: char) -> bool {
    is_identifier_char(c) || matches!(c, ':' | '/')
}

fn consumed<'a>(start: &'a str, rest: &'a str) -> &'a str {
    &start[..start.offset(rest)]
}

// ============================================================================
// Template and statements
// ============================================================================

/// Parse a whole template into a `Template` node whose children are `Statement` nodes.
pub fn parse_template_tree(source: &str) -> Result<Node<'_>, Error> {
    let mut statements = Vec::new();
    let mut rest = source;
    loop {
        let (after_blanks, _) = many0(blank_line)(rest).map_err(|e| syntax_error(source, e))?;
        rest = after_blanks;
        if rest.trim_start_matches([' ', '\t']).is_empty() {
            break;
        }
        let (after, mut nodes) = statement(rest).map_err(|e| syntax_error(source, e))?;
        statements.append(&mut nodes);
        rest = after;
    }

    if statements.is_empty() {
        return Err(Error::Syntax {
            rule: "Template".to_string(),
            line: 1,
            column: 1,
            message: "template contains no statements".to_string(),
        });
    }
    Ok(Node::branch(Rule::Template, source, statements))
}

/// Parse exactly one value (no surrounding text).
pub fn parse_value_tree(text: &str) -> Result<Node<'_>, Error> {
    all_consuming(value_node)(text)
        .map(|(_, node)| node)
        .map_err(|e| syntax_error(text, e))
}

fn blank_line(input: &str) -> PResult<'_, &str> {
    recognize(tuple((space0, line_break)))(input)
}

fn line_break(input: &str) -> PResult<'_, &str> {
    alt((tag("\r\n"), tag("\n"), tag("\r")))(input)
}

fn line_end(input: &str) -> PResult<'_, &str> {
    alt((line_break, eof))(input)
}

/// One line: a statement plus an optional trailing comment, each wrapped in a
/// `Statement` node.
fn statement(input: &str) -> PResult<'_, Vec<Node<'_>>> {
    let (input, _) = space0(input)?;
    let (input, main) = context("Statement", alt((expr, declaration, comment)))(input)?;
    let mut nodes = vec![Node::branch(Rule::Statement, main.text, vec![main])];

    let (input, _) = space0(input)?;
    let input = if nodes[0].children[0].rule == Rule::Comment {
        input
    } else {
        let (input, trailing) = nom::combinator::opt(comment)(input)?;
        if let Some(trailing) = trailing {
            nodes.push(Node::branch(Rule::Statement, trailing.text, vec![trailing]));
        }
        input
    };
    let (input, _) = cut(context("Statement", line_end))(input)?;
    Ok((input, nodes))
}

fn comment(input: &str) -> PResult<'_, Node<'_>> {
    map(
        recognize(tuple((alt((tag("#"), tag("//"))), not_line_ending))),
        |text| Node::leaf(Rule::Comment, text),
    )(input)
}

fn declaration(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, ident) = identifier(input)?;
    let (input, _) = equal(input)?;
    let (input, body) = cut(context("Expr", expr))(input)?;
    Ok((
        input,
        Node::branch(Rule::Declaration, consumed(start, input), vec![ident, body]),
    ))
}

fn expr(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, action) = context("Action", word(Rule::Action))(input)?;
    let (input, _) = space1(input)?;
    let (input, entity) = context("Entity", word(Rule::Entity))(input)?;
    let (input, params) = many0(preceded(space1, param))(input)?;

    let mut children = vec![action, entity];
    children.extend(params);
    Ok((
        input,
        Node::branch(Rule::Expr, consumed(start, input), children),
    ))
}

fn word<'a>(rule: Rule) -> impl FnMut(&'a str) -> PResult<'a, Node<'a>> {
    move |input: &'a str| map(take_while1(is_identifier_char), |t| Node::leaf(rule, t))(input)
}

fn param(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, key) = identifier(input)?;
    let (input, _) = equal(input)?;
    let (input, val) = cut(context("Value", value_node))(input)?;
    Ok((
        input,
        Node::branch(Rule::Param, consumed(start, input), vec![key, val]),
    ))
}

fn equal(input: &str) -> PResult<'_, char> {
    delimited(space0, char('='), space0)(input)
}

fn identifier(input: &str) -> PResult<'_, Node<'_>> {
    map(take_while1(is_identifier_char), |t| {
        Node::leaf(Rule::Identifier, t)
    })(input)
}

fn string_token(input: &str) -> PResult<'_, Node<'_>> {
    map(take_while1(is_string_char), |t| Node::leaf(Rule::StringValue, t))(input)
}

// ============================================================================
// Values
// ============================================================================

fn value_end(input: &str) -> PResult<'_, ()> {
    peek(alt((value((), eof), value((), one_of(" \t\r\n#")))))(input)
}

fn value_node(input: &str) -> PResult<'_, Node<'_>> {
    alt((
        cidr_value,
        ip_value,
        csv_value,
        int_range_value,
        int_value,
        ref_value,
        alias_value,
        hole_value,
        string_value,
    ))(input)
}

fn dotted_quad(input: &str) -> PResult<'_, &str> {
    recognize(tuple((
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
    )))(input)
}

fn cidr_value(input: &str) -> PResult<'_, Node<'_>> {
    map(
        terminated(
            recognize(tuple((dotted_quad, char('/'), digit1))),
            value_end,
        ),
        |t| Node::leaf(Rule::CidrValue, t),
    )(input)
}

fn ip_value(input: &str) -> PResult<'_, Node<'_>> {
    map(terminated(dotted_quad, value_end), |t| {
        Node::leaf(Rule::IpValue, t)
    })(input)
}

fn csv_value(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, first) = string_token(input)?;
    let (input, rest) = many1(preceded(
        tuple((space0, char(','), space0)),
        string_token,
    ))(input)?;
    let (input, _) = value_end(input)?;

    let mut items = vec![first];
    items.extend(rest);
    Ok((
        input,
        Node::branch(Rule::CsvValue, consumed(start, input), items),
    ))
}

fn int_range_value(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, (lo, _, hi)) = terminated(tuple((digit1, char('-'), digit1)), value_end)(input)?;
    Ok((
        input,
        Node::branch(
            Rule::IntRangeValue,
            consumed(start, input),
            vec![Node::leaf(Rule::IntValue, lo), Node::leaf(Rule::IntValue, hi)],
        ),
    ))
}

fn int_value(input: &str) -> PResult<'_, Node<'_>> {
    map(terminated(digit1, value_end), |t| {
        Node::leaf(Rule::IntValue, t)
    })(input)
}

fn ref_value(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, _) = char('$')(input)?;
    let (input, ident) = cut(context("RefValue", terminated(identifier, value_end)))(input)?;
    Ok((
        input,
        Node::branch(Rule::RefValue, consumed(start, input), vec![ident]),
    ))
}

fn alias_value(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, _) = char('@')(input)?;
    let (input, name) = cut(context("AliasValue", terminated(string_token, value_end)))(input)?;
    Ok((
        input,
        Node::branch(Rule::AliasValue, consumed(start, input), vec![name]),
    ))
}

fn hole_value(input: &str) -> PResult<'_, Node<'_>> {
    let start = input;
    let (input, _) = char('{')(input)?;
    let (input, ident) = cut(context(
        "HoleValue",
        terminated(delimited(space0, identifier, tuple((space0, char('}')))), value_end),
    ))(input)?;
    Ok((
        input,
        Node::branch(Rule::HoleValue, consumed(start, input), vec![ident]),
    ))
}

fn string_value(input: &str) -> PResult<'_, Node<'_>> {
    terminated(string_token, value_end)(input)
}

// ============================================================================
// Errors
// ============================================================================

fn syntax_error(source: &str, err: nom::Err<VerboseError<&str>>) -> Error {
    let verbose = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            let (line, column) = line_column(source, source.len());
            return Error::Syntax {
                rule: "Template".to_string(),
                line,
                column,
                message: "incomplete input".to_string(),
            };
        }
    };

    let rule = verbose
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(ctx) => Some(*ctx),
            _ => None,
        })
        .unwrap_or("Template");

    let (at, kind) = match verbose.errors.first() {
        Some((at, kind)) => (*at, Some(kind)),
        None => (source, None),
    };
    let (line, column) = line_column(source, source.offset(at));

    let found = match at.chars().next() {
        None => "end of input".to_string(),
        Some('\n') | Some('\r') => "end of line".to_string(),
        Some(c) => format!("'{}'", c),
    };
    let message = match kind {
        Some(VerboseErrorKind::Char(c)) => format!("expected '{}', found {}", c, found),
        _ => format!("unexpected {}", found),
    };

    Error::Syntax {
        rule: rule.to_string(),
        line,
        column,
        message,
    }
}
