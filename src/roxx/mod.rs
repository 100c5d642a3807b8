//! Roxx, the targeting expression language.
//!
//! Expressions are compiled once into an [`Expression`] when a configuration document is loaded,
//! and evaluated by a [`Parser`] for every flag lookup. Evaluation never panics and never performs
//! I/O; anything it does not understand yields an undefined result.
mod expression;
mod node;
mod parser;
mod value;

pub use expression::Expression;
pub use node::{Node, Operator};
pub use parser::{
    ExpressionEnvironment, ExpressionError, FlagBinding, NoEnvironment, Parser, MAX_NESTING_DEPTH,
};
pub use value::{EvaluationResult, Value};
