use super::Value;

/// A parsed expression term.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A literal operand.
    Literal(Value),
    /// A recognized operator.
    Operator(Operator),
    /// A token that is neither a literal nor a known operator. Evaluating an expression that
    /// contains one always fails.
    Unknown(String),
}

macro_rules! operators {
    ($($variant:ident => $name:literal / $arity:literal,)*) => {
        /// Operators understood by the evaluator.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operator {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )*
        }

        impl Operator {
            /// Look an operator up by its name in expression source.
            pub fn from_name(name: &str) -> Option<Operator> {
                match name {
                    $($name => Some(Operator::$variant),)*
                    _ => None,
                }
            }

            /// Name as written in expression source.
            pub fn name(self) -> &'static str {
                match self {
                    $(Operator::$variant => $name,)*
                }
            }

            /// Number of operands the operator pops.
            pub fn arity(self) -> usize {
                match self {
                    $(Operator::$variant => $arity,)*
                }
            }
        }
    };
}

operators! {
    IsUndefined => "isUndefined" / 1,
    Now => "now" / 0,
    And => "and" / 2,
    Or => "or" / 2,
    Not => "not" / 1,
    Eq => "eq" / 2,
    Ne => "ne" / 2,
    Lt => "lt" / 2,
    Lte => "lte" / 2,
    Gt => "gt" / 2,
    Gte => "gte" / 2,
    SemverEq => "semverEq" / 2,
    SemverNe => "semverNe" / 2,
    SemverLt => "semverLt" / 2,
    SemverLte => "semverLte" / 2,
    SemverGt => "semverGt" / 2,
    SemverGte => "semverGte" / 2,
    Match => "match" / 3,
    IfThen => "ifThen" / 3,
    InArray => "inArray" / 2,
    Md5 => "md5" / 1,
    Concat => "concat" / 2,
    B64d => "b64d" / 1,
    Property => "property" / 1,
    Bucket => "bucket" / 1,
    MergeSeed => "mergeSeed" / 2,
    IsInPercentage => "isInPercentage" / 2,
    IsInPercentageRange => "isInPercentageRange" / 3,
    IsInTargetGroup => "isInTargetGroup" / 1,
    FlagValue => "flagValue" / 1,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
