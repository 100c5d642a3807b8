//! A thread-safe in-memory storage for the currently active configuration. [`ConfigurationStore`]
//! provides lock-free access for readers (flag evaluation) and writers (configuration sync).
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    repositories::{Experiment, ExperimentRepository, TargetGroup, TargetGroupRepository},
    sync::SourceKind,
    Result,
};

/// The configuration payload as served by the configuration sources.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDocument {
    /// Monotonic document version assigned by the server.
    #[serde(default)]
    pub generation: u64,
    /// All experiments of the application.
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    /// All target groups of the application.
    #[serde(default)]
    pub target_groups: Vec<TargetGroup>,
}

/// One immutable configuration generation.
///
/// Experiments and target groups always come from the same document; the whole value is replaced
/// on every sync.
#[derive(Debug)]
pub struct Configuration {
    /// Generation of the source document. `0` before the first sync.
    pub generation: u64,
    /// Where the document came from. `None` before the first sync.
    pub source: Option<SourceKind>,
    /// When the document was applied.
    pub fetched_at: DateTime<Utc>,
    /// Experiment index.
    pub experiments: ExperimentRepository,
    /// Target group index.
    pub target_groups: TargetGroupRepository,
}

impl Configuration {
    /// Configuration used until the first document arrives. Every flag evaluates to its default.
    pub fn empty() -> Configuration {
        Configuration {
            generation: 0,
            source: None,
            fetched_at: Utc::now(),
            experiments: ExperimentRepository::default(),
            target_groups: TargetGroupRepository::default(),
        }
    }

    /// Validate and index `document`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration) if experiment or target
    /// group ids are not unique.
    pub fn from_document(
        document: ConfigurationDocument,
        source: SourceKind,
    ) -> Result<Configuration> {
        Ok(Configuration {
            generation: document.generation,
            source: Some(source),
            fetched_at: Utc::now(),
            experiments: ExperimentRepository::new(document.experiments)?,
            target_groups: TargetGroupRepository::new(document.target_groups)?,
        })
    }
}

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for configuration that allows
/// concurrent access for readers and writers.
///
/// `Configuration` itself is always immutable and can only be replaced completely.
pub struct ConfigurationStore {
    configuration: ArcSwap<Configuration>,
}

impl Default for ConfigurationStore {
    fn default() -> ConfigurationStore {
        ConfigurationStore {
            configuration: ArcSwap::from_pointee(Configuration::empty()),
        }
    }
}

impl ConfigurationStore {
    /// Create a store holding [`Configuration::empty`].
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Get currently active configuration.
    ///
    /// Callers must hold on to the returned snapshot for the whole evaluation so that they never
    /// mix two generations.
    pub fn get_configuration(&self) -> Arc<Configuration> {
        self.configuration.load_full()
    }

    /// Publish a new configuration, returning the previous one.
    pub fn set_configuration(&self, configuration: Arc<Configuration>) -> Arc<Configuration> {
        self.configuration.swap(configuration)
    }

    /// `true` once any document has been applied.
    pub fn has_configuration(&self) -> bool {
        self.configuration.load().source.is_some()
    }
}
