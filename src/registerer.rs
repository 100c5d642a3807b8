use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    engine::Core,
    entities::{Declaration, EntityKind, Flag, Variant},
    repositories::FlagSetting,
    Error, Result,
};

/// Binds declarations to names.
///
/// Use [`Engine::register`](crate::Engine::register).
pub(crate) struct Registerer {
    core: Arc<Core>,
    namespaces: Mutex<HashSet<String>>,
}

impl Registerer {
    pub(crate) fn new(core: Arc<Core>) -> Registerer {
        Registerer {
            core,
            namespaces: Mutex::new(HashSet::new()),
        }
    }

    /// Register `declarations` under `namespace`. The empty namespace registers names as is.
    ///
    /// Either everything is registered or nothing is.
    pub(crate) fn register<N: Into<String>>(
        &self,
        namespace: &str,
        declarations: impl IntoIterator<Item = (N, Declaration)>,
    ) -> Result<RegisteredNamespace> {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if namespaces.contains(namespace) {
            return Err(Error::NamespaceAlreadyRegistered(namespace.to_owned()));
        }

        let mut entries = Vec::new();
        for (name, declaration) in declarations {
            let name = name.into();
            if name.is_empty() {
                return Err(Error::EmptyFlagName);
            }
            let full_name = full_name(namespace, &name);
            if !declaration.options.contains(&declaration.default_value) {
                return Err(Error::InvalidDefaultValue {
                    name: full_name,
                    default: declaration.default_value,
                });
            }
            let setting = FlagSetting {
                name: full_name,
                default_value: declaration.default_value,
                options: declaration.options,
            };
            entries.push((name, declaration.kind, setting));
        }

        self.core
            .flags
            .add_flags(entries.iter().map(|(_, _, setting)| setting.clone()).collect())?;
        namespaces.insert(namespace.to_owned());

        let mut registered = RegisteredNamespace {
            namespace: namespace.to_owned(),
            flags: HashMap::new(),
            variants: HashMap::new(),
        };
        for (name, kind, setting) in entries {
            let setting = Arc::new(setting);
            log::debug!(target: "rox", flag:display = setting.name; "registered flag");
            match kind {
                EntityKind::Flag => {
                    registered
                        .flags
                        .insert(name, Flag::new(setting, Arc::clone(&self.core)));
                }
                EntityKind::Variant => {
                    registered
                        .variants
                        .insert(name, Variant::new(setting, Arc::clone(&self.core)));
                }
            }
        }

        Ok(registered)
    }
}

fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Handles returned by [`Engine::register`](crate::Engine::register), looked up by the name they
/// were declared with.
#[derive(Debug)]
pub struct RegisteredNamespace {
    namespace: String,
    flags: HashMap<String, Flag>,
    variants: HashMap<String, Variant>,
}

impl RegisteredNamespace {
    /// The namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Flag declared as `name`.
    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    /// Variant declared as `name`.
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.get(name)
    }
}
