//! User-facing flag handles and their declarations.
use std::{fmt, sync::Arc};

use crate::{engine::Core, repositories::FlagSetting, Context};

/// Values a boolean flag can take.
pub(crate) const FLAG_OPTIONS: [&str; 2] = ["false", "true"];

/// Kind of a declared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Boolean flag.
    Flag,
    /// String-valued variant with a fixed set of options.
    Variant,
}

/// An unbound flag or variant. Becomes a [`Flag`] or [`Variant`] once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub(crate) kind: EntityKind,
    pub(crate) default_value: String,
    pub(crate) options: Vec<String>,
}

impl Declaration {
    /// Kind of the declared entity.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Value served when no experiment applies.
    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    /// Accepted values.
    pub fn options(&self) -> &[String] {
        &self.options
    }
}

/// Creates flag and variant declarations.
///
/// The provided methods build the standard entities; implement the trait to decorate them.
pub trait EntityProvider {
    /// Declare a boolean flag.
    fn create_flag(&self, default_value: bool) -> Declaration {
        Declaration {
            kind: EntityKind::Flag,
            default_value: default_value.to_string(),
            options: FLAG_OPTIONS.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// Declare a variant. `default_value` must be one of `options`, which registration checks.
    fn create_variant(&self, default_value: &str, options: &[&str]) -> Declaration {
        Declaration {
            kind: EntityKind::Variant,
            default_value: default_value.to_owned(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// The standard [`EntityProvider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntityProvider;

impl EntityProvider for DefaultEntityProvider {}

/// A registered boolean flag.
///
/// Cheap to clone; every clone evaluates against the latest configuration.
#[derive(Clone)]
pub struct Flag {
    setting: Arc<FlagSetting>,
    core: Arc<Core>,
}

impl Flag {
    pub(crate) fn new(setting: Arc<FlagSetting>, core: Arc<Core>) -> Flag {
        Flag { setting, core }
    }

    /// Full name, including the namespace.
    pub fn name(&self) -> &str {
        &self.setting.name
    }

    /// Value returned when no experiment applies.
    pub fn default_value(&self) -> bool {
        self.setting.default_value == "true"
    }

    /// Evaluate the flag for `context`, layered over the engine's global context.
    ///
    /// Never fails: any problem with the configuration results in the default value.
    pub fn is_enabled(&self, context: &Context) -> bool {
        self.core.evaluate(&self.setting, context) == "true"
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.setting.name)
            .field("default_value", &self.default_value())
            .finish()
    }
}

/// A registered string variant.
#[derive(Clone)]
pub struct Variant {
    setting: Arc<FlagSetting>,
    core: Arc<Core>,
}

impl Variant {
    pub(crate) fn new(setting: Arc<FlagSetting>, core: Arc<Core>) -> Variant {
        Variant { setting, core }
    }

    /// Full name, including the namespace.
    pub fn name(&self) -> &str {
        &self.setting.name
    }

    /// Value returned when no experiment applies.
    pub fn default_value(&self) -> &str {
        &self.setting.default_value
    }

    /// Declared options.
    pub fn options(&self) -> &[String] {
        &self.setting.options
    }

    /// Evaluate the variant for `context`, layered over the engine's global context.
    ///
    /// The result is always one of [`Variant::options`]: values outside of them are replaced by
    /// the default.
    pub fn value(&self, context: &Context) -> String {
        self.core.evaluate(&self.setting, context)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.setting.name)
            .field("default_value", &self.setting.default_value)
            .field("options", &self.setting.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultEntityProvider, EntityKind, EntityProvider};

    #[test]
    fn flag_declaration() {
        let declaration = DefaultEntityProvider.create_flag(true);

        assert_eq!(declaration.kind(), EntityKind::Flag);
        assert_eq!(declaration.default_value(), "true");
        assert_eq!(declaration.options(), ["false", "true"]);
    }

    #[test]
    fn variant_declaration() {
        let declaration = DefaultEntityProvider.create_variant("red", &["red", "blue"]);

        assert_eq!(declaration.kind(), EntityKind::Variant);
        assert_eq!(declaration.default_value(), "red");
        assert_eq!(declaration.options(), ["red", "blue"]);
    }
}
