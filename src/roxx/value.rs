use derive_more::From;

/// Operand of the expression stack machine.
///
/// Unlike [`ContextValue`](crate::ContextValue), there is no null: absent and null context
/// properties both evaluate to `Undefined`.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Value {
    /// The `undefined` literal, or a lookup that found nothing.
    Undefined,
    /// A boolean.
    Bool(bool),
    /// A number. All numbers are `f64`.
    Number(f64),
    /// A string.
    String(String),
    /// An array literal.
    List(Vec<Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl Value {
    /// Boolean coercion used by `and`, `or`, `not` and `ifThen`.
    ///
    /// `Undefined` is `false`, and the strings `"true"`/`"false"` are interchangeable with the
    /// booleans. Anything else cannot be used as a condition.
    pub(crate) fn to_condition(&self) -> Option<bool> {
        match self {
            Value::Undefined => Some(false),
            other => as_bool(other),
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s == "true" => Some(true),
        Value::String(s) if s == "false" => Some(false),
        _ => None,
    }
}

/// Result of evaluating an expression.
///
/// Typed accessors return `None` when the value cannot be represented as the requested type;
/// callers fall back to the flag default in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    value: Value,
}

impl EvaluationResult {
    pub(crate) fn new(value: Value) -> EvaluationResult {
        EvaluationResult { value }
    }

    /// The result of an expression that failed to evaluate.
    pub fn undefined() -> EvaluationResult {
        EvaluationResult::new(Value::Undefined)
    }

    /// Raw evaluated value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the result, returning the raw value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// `Some` for booleans and for the strings `"true"` and `"false"`.
    pub fn as_bool(&self) -> Option<bool> {
        as_bool(&self.value)
    }

    /// `Some` for strings, and for booleans rendered as `"true"`/`"false"`.
    pub fn as_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}
