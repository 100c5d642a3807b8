//! Indexed views over configuration-derived and registration-derived data.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{roxx::Expression, Error, Result};

/// A targeting experiment from the configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Unique experiment id.
    pub id: String,
    /// Human readable name, reported with impressions.
    pub name: String,
    /// Archived experiments are kept for reference but never applied.
    #[serde(default)]
    pub archived: bool,
    /// Full names of the flags bound to this experiment.
    #[serde(default)]
    pub flags: HashSet<String>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: HashSet<String>,
    /// Context property used by `bucket([])`.
    #[serde(default)]
    pub stickiness_property: Option<String>,
    /// Condition producing the flag value.
    pub condition: Expression,
}

/// A named, reusable condition referenced through `isInTargetGroup`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetGroup {
    /// Unique target group id.
    pub id: String,
    /// Membership condition.
    pub condition: Expression,
}

/// Experiments of one configuration generation.
#[derive(Debug, Default)]
pub struct ExperimentRepository {
    experiments: Vec<Experiment>,
    by_id: HashMap<String, usize>,
    by_flag: HashMap<String, usize>,
}

impl ExperimentRepository {
    /// Index `experiments`.
    ///
    /// A flag is bound to the first non-archived experiment (in document order) that lists it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if two experiments share an id.
    pub fn new(experiments: Vec<Experiment>) -> Result<ExperimentRepository> {
        let mut by_id = HashMap::with_capacity(experiments.len());
        let mut by_flag = HashMap::new();

        for (index, experiment) in experiments.iter().enumerate() {
            if by_id.insert(experiment.id.clone(), index).is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate experiment id {:?}",
                    experiment.id
                )));
            }
            if experiment.archived {
                continue;
            }
            for flag in &experiment.flags {
                by_flag.entry(flag.clone()).or_insert(index);
            }
        }

        Ok(ExperimentRepository {
            experiments,
            by_id,
            by_flag,
        })
    }

    /// Experiment with the given id, archived or not.
    pub fn get_by_id(&self, id: &str) -> Option<&Experiment> {
        self.by_id.get(id).map(|&index| &self.experiments[index])
    }

    /// The active experiment bound to `flag_name`.
    pub fn get_by_flag(&self, flag_name: &str) -> Option<&Experiment> {
        self.by_flag
            .get(flag_name)
            .map(|&index| &self.experiments[index])
    }

    /// All experiments in document order.
    pub fn all(&self) -> &[Experiment] {
        &self.experiments
    }
}

/// Target groups of one configuration generation.
#[derive(Debug, Default)]
pub struct TargetGroupRepository {
    target_groups: HashMap<String, TargetGroup>,
}

impl TargetGroupRepository {
    /// Index `target_groups`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if two target groups share an id.
    pub fn new(target_groups: Vec<TargetGroup>) -> Result<TargetGroupRepository> {
        let mut by_id = HashMap::with_capacity(target_groups.len());
        for target_group in target_groups {
            let id = target_group.id.clone();
            if by_id.insert(id.clone(), target_group).is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate target group id {id:?}"
                )));
            }
        }
        Ok(TargetGroupRepository {
            target_groups: by_id,
        })
    }

    /// Target group with the given id.
    pub fn get_by_id(&self, id: &str) -> Option<&TargetGroup> {
        self.target_groups.get(id)
    }

    /// Number of target groups.
    pub fn len(&self) -> usize {
        self.target_groups.len()
    }

    /// `true` if there are no target groups.
    pub fn is_empty(&self) -> bool {
        self.target_groups.is_empty()
    }
}

/// What was registered for a flag or variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSetting {
    /// Full name, including the namespace.
    pub name: String,
    /// Value served when no experiment applies.
    pub default_value: String,
    /// Accepted values. A flag accepts `"true"` and `"false"`.
    pub options: Vec<String>,
}

/// Registered flags, keyed by full name.
///
/// Reads are lock-free; registrations copy the map and publish it with a single swap.
#[derive(Default)]
pub struct FlagRepository {
    flags: ArcSwap<HashMap<String, Arc<FlagSetting>>>,
}

impl FlagRepository {
    /// Create an empty repository.
    pub fn new() -> FlagRepository {
        FlagRepository::default()
    }

    /// Register `settings` as a single unit.
    ///
    /// # Errors
    ///
    /// [`Error::FlagAlreadyRegistered`] if any of the names is taken. Nothing is registered in
    /// that case.
    pub fn add_flags(&self, settings: Vec<FlagSetting>) -> Result<()> {
        let mut result = Ok(());
        self.flags.rcu(|current| {
            result = Ok(());
            let mut next = HashMap::clone(current);
            for setting in &settings {
                if next.contains_key(&setting.name) {
                    result = Err(Error::FlagAlreadyRegistered(setting.name.clone()));
                    return Arc::clone(current);
                }
                next.insert(setting.name.clone(), Arc::new(setting.clone()));
            }
            Arc::new(next)
        });
        result
    }

    /// Register a single flag.
    pub fn add_flag(&self, setting: FlagSetting) -> Result<()> {
        self.add_flags(vec![setting])
    }

    /// Registered setting for `name`.
    pub fn get_flag(&self, name: &str) -> Option<Arc<FlagSetting>> {
        self.flags.load().get(name).cloned()
    }

    /// All registered settings as of now.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<FlagSetting>>> {
        self.flags.load_full()
    }

    /// Names of all registered flags.
    pub fn names(&self) -> Vec<String> {
        self.flags.load().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::{
        Experiment, ExperimentRepository, FlagRepository, FlagSetting, TargetGroup,
        TargetGroupRepository,
    };
    use crate::{roxx::Expression, Error};

    fn experiment(id: &str, archived: bool, flags: &[&str]) -> Experiment {
        Experiment {
            id: id.to_owned(),
            name: format!("experiment {id}"),
            archived,
            flags: flags.iter().map(|f| f.to_string()).collect(),
            labels: HashSet::new(),
            stickiness_property: None,
            condition: Expression::parse("true"),
        }
    }

    fn setting(name: &str) -> FlagSetting {
        FlagSetting {
            name: name.to_owned(),
            default_value: "false".to_owned(),
            options: vec!["false".to_owned(), "true".to_owned()],
        }
    }

    #[test]
    fn deserializes_experiment() {
        let experiment: Experiment = serde_json::from_str(
            r#"{
                "id": "e1",
                "name": "Checkout",
                "flags": ["app.checkout"],
                "stickinessProperty": "uid",
                "condition": "lt(bucket([]), 50)"
            }"#,
        )
        .unwrap();

        assert_eq!(experiment.id, "e1");
        assert!(!experiment.archived);
        assert!(experiment.labels.is_empty());
        assert_eq!(experiment.stickiness_property.as_deref(), Some("uid"));
        assert_eq!(experiment.condition.source(), "lt(bucket([]), 50)");
    }

    #[test]
    fn archived_experiments_are_not_bound() {
        let repository = ExperimentRepository::new(vec![
            experiment("old", true, &["app.flag"]),
            experiment("new", false, &["app.flag"]),
        ])
        .unwrap();

        assert_eq!(repository.get_by_flag("app.flag").unwrap().id, "new");
        assert!(repository.get_by_id("old").unwrap().archived);
        assert!(repository.get_by_flag("app.other").is_none());
    }

    #[test]
    fn first_active_experiment_wins() {
        let repository = ExperimentRepository::new(vec![
            experiment("a", false, &["app.flag"]),
            experiment("b", false, &["app.flag"]),
        ])
        .unwrap();

        assert_eq!(repository.get_by_flag("app.flag").unwrap().id, "a");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = ExperimentRepository::new(vec![
            experiment("a", false, &[]),
            experiment("a", false, &[]),
        ]);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let group = || TargetGroup {
            id: "g".to_owned(),
            condition: Expression::parse("true"),
        };
        let result = TargetGroupRepository::new(vec![group(), group()]);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn flag_registration_is_all_or_nothing() {
        let repository = FlagRepository::new();
        repository.add_flag(setting("app.a")).unwrap();

        let result = repository.add_flags(vec![setting("app.b"), setting("app.a")]);

        assert!(matches!(result, Err(Error::FlagAlreadyRegistered(name)) if name == "app.a"));
        assert!(repository.get_flag("app.b").is_none());
        assert_eq!(repository.names(), vec!["app.a".to_owned()]);
    }

    #[test]
    fn concurrent_registration() {
        let repository = Arc::new(FlagRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repository = Arc::clone(&repository);
                std::thread::spawn(move || repository.add_flag(setting(&format!("app.f{i}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(repository.names().len(), 8);
    }
}
