use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Key-value properties describing the entity a flag is evaluated for.
///
/// # Examples
/// ```
/// # use rox::{Context, ContextValue};
/// let context = [
///     ("uid".to_owned(), "user-3".into()),
///     ("age".to_owned(), 30.0.into()),
///     ("beta".to_owned(), true.into()),
/// ].into_iter().collect::<Context>();
/// ```
pub type Context = HashMap<String, ContextValue>;

/// Value of a context property.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum ContextValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A present, null value. Distinct from an absent key.
    Null,
}

impl ContextValue {
    /// Return the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Request-local context layered over the process-global one.
///
/// Built per evaluation call; holds only references.
#[derive(Debug, Clone, Copy)]
pub struct MergedContext<'a> {
    local: &'a Context,
    global: &'a Context,
}

impl<'a> MergedContext<'a> {
    /// Layer `local` over `global`.
    pub fn new(global: &'a Context, local: &'a Context) -> MergedContext<'a> {
        MergedContext { local, global }
    }

    /// Look `key` up in the local context, then in the global one.
    ///
    /// Returns `None` if the key is absent from both, and `Some(&ContextValue::Null)` if it is
    /// present with a null value.
    pub fn get(&self, key: &str) -> Option<&'a ContextValue> {
        self.local.get(key).or_else(|| self.global.get(key))
    }

    /// Flatten into a single map. Local values win.
    pub fn snapshot(&self) -> Context {
        let mut merged = self.global.clone();
        merged.extend(self.local.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}
