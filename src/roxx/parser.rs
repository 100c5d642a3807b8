use std::cmp::Ordering;

use base64::Engine as _;
use chrono::Utc;
use regex::RegexBuilder;

use crate::{bucketing::Md5Bucketer, Context, ContextValue, MergedContext};

use super::{EvaluationResult, Expression, Node, Operator, Value};

/// Nested evaluations (`isInTargetGroup`, `flagValue`) deeper than this fail.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Why an expression could not be evaluated.
///
/// Never surfaced to flag callers: [`Parser::evaluate`] turns it into an undefined result.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// The expression contains a token that is neither a literal nor an operator.
    #[error("unknown token {0:?}")]
    UnknownToken(String),
    /// An operator found fewer operands than its arity.
    #[error("operator {0} is missing operands")]
    StackUnderflow(Operator),
    /// An operator got an operand of a type it cannot work with.
    #[error("operator {0} received an operand of unexpected type")]
    TypeMismatch(Operator),
    /// `match` was given an invalid regular expression.
    #[error("invalid regular expression {0:?}")]
    InvalidRegex(String),
    /// Target groups or flags reference each other too deeply (or in a cycle).
    #[error("expression nesting is deeper than {MAX_NESTING_DEPTH}")]
    TooDeep,
}

/// What an expression can see besides the context: target groups, other flags and the
/// stickiness property of the experiment being evaluated.
///
/// All methods default to "nothing there", which is what [`NoEnvironment`] uses.
pub trait ExpressionEnvironment {
    /// Condition of target group `id`.
    fn target_group_condition(&self, _id: &str) -> Option<&Expression> {
        None
    }

    /// How to resolve `flagValue(name)`.
    fn flag_binding(&self, _name: &str) -> FlagBinding<'_> {
        FlagBinding::default()
    }

    /// Stickiness property used by `bucket([])`.
    fn stickiness_property(&self) -> Option<&str> {
        None
    }
}

/// An environment with no target groups, no flags and no stickiness property.
pub struct NoEnvironment;

impl ExpressionEnvironment for NoEnvironment {}

/// Everything needed to evaluate another flag from inside an expression.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlagBinding<'a> {
    /// Condition of the experiment bound to the flag, if any.
    pub condition: Option<&'a Expression>,
    /// Registered default, if the flag is registered.
    pub default_value: Option<&'a str>,
    /// Registered options. `None` accepts any value.
    pub options: Option<&'a [String]>,
}

impl FlagBinding<'_> {
    fn accepts(&self, value: &str) -> bool {
        self.options
            .map_or(true, |options| options.iter().any(|o| o == value))
    }
}

/// The expression evaluator: a single left-to-right stack machine pass over an
/// [`Expression`].
#[derive(Debug, Default, Clone)]
pub struct Parser {
    bucketer: Md5Bucketer,
}

impl Parser {
    /// Create a parser.
    pub fn new() -> Parser {
        Parser::default()
    }

    /// Compile and evaluate `source` with an empty context. Mostly useful for testing rules.
    pub fn evaluate_str(&self, source: &str) -> EvaluationResult {
        let empty = Context::new();
        self.evaluate(
            &Expression::parse(source),
            &MergedContext::new(&empty, &empty),
            &NoEnvironment,
        )
    }

    /// Evaluate `expression`, failing closed.
    ///
    /// Any [`ExpressionError`] is logged and turned into [`EvaluationResult::undefined`], so that
    /// a broken targeting rule can only ever produce the flag default.
    pub fn evaluate(
        &self,
        expression: &Expression,
        context: &MergedContext,
        environment: &dyn ExpressionEnvironment,
    ) -> EvaluationResult {
        self.try_evaluate(expression, context, environment)
            .unwrap_or_else(|err| {
                log::debug!(target: "rox",
                            expression = expression.source();
                            "failed to evaluate expression: {}", err);
                EvaluationResult::undefined()
            })
    }

    /// Evaluate `expression`, reporting why it failed.
    pub fn try_evaluate(
        &self,
        expression: &Expression,
        context: &MergedContext,
        environment: &dyn ExpressionEnvironment,
    ) -> Result<EvaluationResult, ExpressionError> {
        Evaluation {
            parser: self,
            context,
            environment,
        }
        .run(expression, 0)
        .map(EvaluationResult::new)
    }
}

struct Evaluation<'p, 'c, 'e> {
    parser: &'p Parser,
    context: &'c MergedContext<'c>,
    environment: &'e dyn ExpressionEnvironment,
}

impl Evaluation<'_, '_, '_> {
    fn run(&self, expression: &Expression, depth: usize) -> Result<Value, ExpressionError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ExpressionError::TooDeep);
        }

        let mut stack: Vec<Value> = Vec::with_capacity(expression.nodes().len());
        for node in expression.nodes() {
            match node {
                Node::Literal(value) => stack.push(value.clone()),
                Node::Operator(op) => {
                    let at = stack
                        .len()
                        .checked_sub(op.arity())
                        .ok_or(ExpressionError::StackUnderflow(*op))?;
                    // First argument is on top of the stack.
                    let mut args = stack.split_off(at);
                    args.reverse();
                    let result = self.apply(*op, args, depth)?;
                    stack.push(result);
                }
                Node::Unknown(token) => return Err(ExpressionError::UnknownToken(token.clone())),
            }
        }

        Ok(stack.pop().unwrap_or(Value::Undefined))
    }

    fn apply(
        &self,
        op: Operator,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ExpressionError> {
        let mut args = args.into_iter();
        // Arity has been checked by the caller.
        let mut next = || args.next().unwrap_or(Value::Undefined);

        let value = match op {
            Operator::IsUndefined => Value::Bool(next() == Value::Undefined),
            Operator::Now => Value::Number(Utc::now().timestamp_millis() as f64),
            Operator::And | Operator::Or => {
                let a = condition(op, &next())?;
                let b = condition(op, &next())?;
                Value::Bool(if op == Operator::And { a && b } else { a || b })
            }
            Operator::Not => Value::Bool(!condition(op, &next())?),
            Operator::Eq => Value::Bool(next() == next()),
            Operator::Ne => Value::Bool(next() != next()),
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                let ordering = match (next(), next()) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(&b),
                    _ => None,
                };
                Value::Bool(ordering.is_some_and(|o| ordering_matches(op, o)))
            }
            Operator::SemverEq
            | Operator::SemverNe
            | Operator::SemverLt
            | Operator::SemverLte
            | Operator::SemverGt
            | Operator::SemverGte => {
                let (a, b) = (next(), next());
                let ordering = match (version(&a), version(&b)) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                };
                Value::Bool(ordering.is_some_and(|o| ordering_matches(op, o)))
            }
            Operator::Match => {
                let (subject, pattern, flags) = (next(), next(), next());
                match (subject.as_str(), pattern.as_str(), flags.as_str()) {
                    (Some(subject), Some(pattern), Some(flags)) => {
                        Value::Bool(regex_match(subject, pattern, flags)?)
                    }
                    _ => Value::Bool(false),
                }
            }
            Operator::IfThen => {
                let (cond, then, otherwise) = (next(), next(), next());
                if condition(op, &cond)? {
                    then
                } else {
                    otherwise
                }
            }
            Operator::InArray => {
                let (needle, haystack) = (next(), next());
                match haystack {
                    Value::List(items) => Value::Bool(items.contains(&needle)),
                    _ => Value::Bool(false),
                }
            }
            Operator::Md5 => match next() {
                Value::String(s) => Value::String(format!("{:x}", md5::compute(s))),
                _ => Value::Undefined,
            },
            Operator::Concat => match (next(), next()) {
                (Value::String(a), Value::String(b)) => Value::String(a + &b),
                _ => Value::Undefined,
            },
            Operator::B64d => next()
                .as_str()
                .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .map_or(Value::Undefined, Value::String),
            Operator::Property => match next() {
                Value::String(name) => property(self.context, &name),
                _ => Value::Undefined,
            },
            Operator::Bucket => self.bucket(next()),
            Operator::MergeSeed => match (seed_part(&next()), seed_part(&next())) {
                (Some(a), Some(b)) => Value::String(format!("{a}.{b}")),
                _ => Value::Undefined,
            },
            Operator::IsInPercentage => match (next(), next()) {
                (Value::Number(percentage), Value::String(seed)) => {
                    Value::Bool(self.parser.bucketer.seed_fraction(&seed) <= percentage)
                }
                _ => Value::Bool(false),
            },
            Operator::IsInPercentageRange => match (next(), next(), next()) {
                (Value::Number(low), Value::Number(high), Value::String(seed)) => {
                    let fraction = self.parser.bucketer.seed_fraction(&seed);
                    Value::Bool(low <= fraction && fraction < high)
                }
                _ => Value::Bool(false),
            },
            Operator::IsInTargetGroup => {
                let condition = next()
                    .as_str()
                    .and_then(|id| self.environment.target_group_condition(id));
                match condition {
                    Some(condition) => {
                        let result = EvaluationResult::new(self.run(condition, depth + 1)?);
                        Value::Bool(result.as_bool().unwrap_or(false))
                    }
                    None => Value::Bool(false),
                }
            }
            Operator::FlagValue => match next() {
                Value::String(name) => Value::String(self.flag_value(&name, depth)?),
                _ => Value::String("false".to_owned()),
            },
        };

        Ok(value)
    }

    fn bucket(&self, properties: Value) -> Value {
        let names: Vec<&str> = match &properties {
            Value::List(items) if items.is_empty() => {
                self.environment.stickiness_property().into_iter().collect()
            }
            Value::List(items) => {
                match items.iter().map(Value::as_str).collect::<Option<Vec<_>>>() {
                    Some(names) => names,
                    None => return Value::Undefined,
                }
            }
            Value::String(name) => vec![name.as_str()],
            _ => return Value::Undefined,
        };
        if names.is_empty() {
            return Value::Undefined;
        }

        let values: Option<Vec<&ContextValue>> =
            names.iter().map(|name| self.context.get(name)).collect();
        values
            .and_then(|values| self.parser.bucketer.bucket_for_values(values))
            .map_or(Value::Undefined, |bucket| Value::Number(f64::from(bucket)))
    }

    fn flag_value(&self, name: &str, depth: usize) -> Result<String, ExpressionError> {
        let binding = self.environment.flag_binding(name);
        let evaluated = match binding.condition {
            Some(condition) => EvaluationResult::new(self.run(condition, depth + 1)?).as_string(),
            None => None,
        };
        Ok(match evaluated {
            Some(value) if binding.accepts(&value) => value,
            _ => binding.default_value.unwrap_or("false").to_owned(),
        })
    }
}

fn condition(op: Operator, value: &Value) -> Result<bool, ExpressionError> {
    value.to_condition().ok_or(ExpressionError::TypeMismatch(op))
}

fn ordering_matches(op: Operator, ordering: Ordering) -> bool {
    match op {
        Operator::Lt | Operator::SemverLt => ordering == Ordering::Less,
        Operator::Lte | Operator::SemverLte => ordering != Ordering::Greater,
        Operator::Gt | Operator::SemverGt => ordering == Ordering::Greater,
        Operator::Gte | Operator::SemverGte => ordering != Ordering::Less,
        Operator::SemverEq => ordering == Ordering::Equal,
        Operator::SemverNe => ordering != Ordering::Equal,
        _ => false,
    }
}

/// Dotted numeric version (`1`, `1.2`, `1.2.3.4`). Compared component-wise, so `1.1 < 1.1.0`
/// and `1.0.0 != 1`.
fn version(value: &Value) -> Option<Vec<u64>> {
    value
        .as_str()?
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse().ok()
            }
        })
        .collect()
}

fn regex_match(subject: &str, pattern: &str, flags: &str) -> Result<bool, ExpressionError> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|_| ExpressionError::InvalidRegex(pattern.to_owned()))?;
    Ok(regex.is_match(subject))
}

fn property(context: &MergedContext, name: &str) -> Value {
    match context.get(name) {
        Some(ContextValue::String(s)) => Value::String(s.clone()),
        Some(ContextValue::Number(n)) => Value::Number(*n),
        Some(ContextValue::Boolean(b)) => Value::Bool(*b),
        Some(ContextValue::Null) | None => Value::Undefined,
    }
}

fn seed_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Undefined | Value::List(_) => None,
    }
}
