//! Tokenizer for the prefix expression language.
//!
//! ```text
//! ifThen(and(isInTargetGroup("beta"), lt(bucket(["uid"]), 50)), "true", "false")
//! ```
//!
//! Parentheses and commas only separate tokens; every operator has a fixed arity, so the call
//! structure is implied by the order of tokens.
use serde::Deserialize;

use super::{Node, Operator, Value};

/// A compiled expression.
///
/// Nodes are stored in evaluation order, which is the reverse of source order: walking them left
/// to right, every operator finds its operands on top of the stack with the first argument on top.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "String")]
pub struct Expression {
    source: String,
    nodes: Vec<Node>,
}

impl Expression {
    /// Compile `source`. Never fails: unrecognized tokens become [`Node::Unknown`].
    pub fn parse(source: impl Into<String>) -> Expression {
        let source = source.into();
        let mut nodes = tokenize(&source);
        nodes.reverse();
        Expression { source, nodes }
    }

    /// Source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Nodes in evaluation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// `true` if the expression contains a token the evaluator does not understand.
    pub fn has_unknown(&self) -> bool {
        self.nodes.iter().any(|node| matches!(node, Node::Unknown(_)))
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Expression {
        Expression::parse(source)
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Expression {
        Expression::parse(source)
    }
}

/// Split `source` into nodes in source order.
pub(crate) fn tokenize(source: &str) -> Vec<Node> {
    let mut tokenizer = Tokenizer::default();
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        if let Some(string) = tokenizer.string.as_mut() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped @ ('"' | '\\')) => string.push(escaped),
                    Some(other) => {
                        string.push('\\');
                        string.push(other);
                    }
                    None => string.push('\\'),
                },
                '"' => {
                    let string = tokenizer.string.take().unwrap_or_default();
                    tokenizer.emit(Node::Literal(Value::String(string)));
                }
                other => string.push(other),
            }
            continue;
        }

        match c {
            '"' => {
                tokenizer.flush();
                tokenizer.string = Some(String::new());
            }
            '[' => {
                tokenizer.flush();
                if tokenizer.array.is_some() {
                    tokenizer.nodes.push(Node::Unknown("[".to_owned()));
                } else {
                    tokenizer.array = Some(Vec::new());
                }
            }
            ']' => {
                tokenizer.flush();
                match tokenizer.array.take() {
                    Some(items) => tokenizer.nodes.push(Node::Literal(Value::List(items))),
                    None => tokenizer.nodes.push(Node::Unknown("]".to_owned())),
                }
            }
            '(' | ')' | ',' => tokenizer.flush(),
            c if c.is_whitespace() => tokenizer.flush(),
            other => tokenizer.bare.push(other),
        }
    }

    // An unterminated string is dropped, an unterminated array is not.
    tokenizer.flush();
    if tokenizer.array.is_some() {
        tokenizer.nodes.push(Node::Unknown("[".to_owned()));
    }

    tokenizer.nodes
}

#[derive(Default)]
struct Tokenizer {
    nodes: Vec<Node>,
    bare: String,
    string: Option<String>,
    array: Option<Vec<Value>>,
}

impl Tokenizer {
    fn flush(&mut self) {
        if self.bare.is_empty() {
            return;
        }
        let token = std::mem::take(&mut self.bare);
        let node = classify(token);
        self.emit(node);
    }

    fn emit(&mut self, node: Node) {
        match (&mut self.array, node) {
            (Some(items), Node::Literal(value)) => items.push(value),
            // Arrays hold literals only.
            (Some(_), Node::Operator(op)) => self.nodes.push(Node::Unknown(op.name().to_owned())),
            (_, node) => self.nodes.push(node),
        }
    }
}

fn classify(token: String) -> Node {
    if let Some(op) = Operator::from_name(&token) {
        return Node::Operator(op);
    }
    match token.as_str() {
        "true" => Node::Literal(Value::Bool(true)),
        "false" => Node::Literal(Value::Bool(false)),
        "undefined" => Node::Literal(Value::Undefined),
        t if is_number(t) => match t.parse::<f64>() {
            Ok(n) => Node::Literal(Value::Number(n)),
            Err(_) => Node::Unknown(token),
        },
        _ => Node::Unknown(token),
    }
}

/// `-?digits(.digits)?`
fn is_number(token: &str) -> bool {
    let unsigned = token.strip_prefix('-').unwrap_or(token);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.map_or(true, digits)
}
