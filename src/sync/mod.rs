//! Configuration sync: pulling the configuration document from remote sources and publishing it
//! into the [`ConfigurationStore`].
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex, PoisonError,
};

use serde::Serialize;

use crate::{
    configuration_store::{Configuration, ConfigurationDocument, ConfigurationStore},
    Error, Result,
};

mod http;
mod poller;
mod state;

use http::endpoint;
pub use http::{parse_document, HttpSource};
pub use poller::{PollerThread, PollerThreadConfig};
pub use state::{State, StateSender};

/// Kind of a configuration source. Reported with every applied configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Static document on the CDN.
    Cdn,
    /// The configuration API.
    Api,
    /// A local Roxy proxy.
    Roxy,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SourceKind::Cdn => "cdn",
            SourceKind::Api => "api",
            SourceKind::Roxy => "roxy",
        })
    }
}

/// Somewhere a configuration document can be fetched from.
pub trait ConfigurationSource: Send + Sync {
    /// Tag recorded on configurations fetched from this source.
    fn kind(&self) -> SourceKind;

    /// Fetch the current document. Blocking.
    fn fetch(&self) -> Result<ConfigurationDocument>;
}

/// Phase of the configuration sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncState {
    /// Between cycles.
    Idle = 0,
    /// Contacting sources.
    Fetching = 1,
    /// Publishing a fetched document.
    Applying = 2,
    /// Every source failed in the current cycle.
    Failed = 3,
}

impl SyncState {
    fn from_u8(value: u8) -> SyncState {
        match value {
            1 => SyncState::Fetching,
            2 => SyncState::Applying,
            3 => SyncState::Failed,
            _ => SyncState::Idle,
        }
    }
}

/// How a sync cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchStatus {
    /// A document was fetched and applied.
    AppliedFromNetwork,
    /// No source produced a valid document. The previous configuration stays active.
    FetchFailed,
}

/// Reported to the [`ConfigurationFetchedHandler`] after every sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    /// How the cycle ended.
    pub status: FetchStatus,
    /// Source of the applied document.
    pub source: Option<SourceKind>,
    /// Generation active after the cycle.
    pub generation: u64,
    /// `true` if the applied document replaced a different generation.
    pub has_changes: bool,
}

/// Receives a [`FetchOutcome`] after every sync cycle.
///
/// The handler runs before the cycle returns to [`SyncState::Idle`], so
/// [`ConfigurationSync::state`] reads [`SyncState::Applying`] or [`SyncState::Failed`] from
/// within it.
///
/// Implemented for closures:
/// ```
/// # use rox::{EngineConfig, FetchOutcome};
/// EngineConfig::from_app_key("app-key").configuration_fetched_handler(|outcome: &FetchOutcome| {
///     println!("configuration sync: {:?}", outcome.status);
/// });
/// ```
pub trait ConfigurationFetchedHandler {
    /// Called on the syncing thread. Must not block for long.
    fn on_configuration_fetched(&self, outcome: &FetchOutcome);
}

impl<T: Fn(&FetchOutcome)> ConfigurationFetchedHandler for T {
    fn on_configuration_fetched(&self, outcome: &FetchOutcome) {
        self(outcome);
    }
}

/// Runs fetch-and-apply cycles over an ordered list of sources.
pub struct ConfigurationSync {
    sources: Vec<Box<dyn ConfigurationSource>>,
    store: Arc<ConfigurationStore>,
    handler: Option<Box<dyn ConfigurationFetchedHandler + Send + Sync>>,
    state: AtomicU8,
    /// Serializes cycles started from different threads.
    cycle: Mutex<()>,
}

impl ConfigurationSync {
    /// Create a sync that tries `sources` in order and publishes into `store`.
    pub fn new(
        sources: Vec<Box<dyn ConfigurationSource>>,
        store: Arc<ConfigurationStore>,
    ) -> ConfigurationSync {
        ConfigurationSync {
            sources,
            store,
            handler: None,
            state: AtomicU8::new(SyncState::Idle as u8),
            cycle: Mutex::new(()),
        }
    }

    /// Report every cycle to `handler`.
    pub fn with_handler(
        mut self,
        handler: Box<dyn ConfigurationFetchedHandler + Send + Sync>,
    ) -> ConfigurationSync {
        self.handler = Some(handler);
        self
    }

    /// Current phase.
    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store this sync publishes into.
    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    /// Run one cycle: try sources in order and publish the first valid document.
    ///
    /// Sources after the first success are not contacted. If every source fails, the store is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSources`] if no sources are configured.
    /// - [`Error::AllSourcesFailed`] holding the error of the last source.
    pub fn sync_once(&self) -> Result<FetchOutcome> {
        let _cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);

        if self.sources.is_empty() {
            return Err(Error::NoSources);
        }

        self.set_state(SyncState::Fetching);
        let mut last_error = Error::NoSources;

        for source in &self.sources {
            let kind = source.kind();
            log::debug!(target: "rox", source:display = kind; "fetching configuration");

            let configuration = source
                .fetch()
                .and_then(|document| Configuration::from_document(document, kind));
            match configuration {
                Ok(configuration) => {
                    let outcome = self.apply(configuration);
                    self.notify(&outcome);
                    self.set_state(SyncState::Idle);
                    return Ok(outcome);
                }
                Err(err) => {
                    log::debug!(target: "rox",
                                source:display = kind;
                                "configuration source failed: {}", err);
                    last_error = err;
                }
            }
        }

        self.set_state(SyncState::Failed);
        log::warn!(target: "rox", "failed to fetch configuration from all sources: {}", last_error);
        let outcome = FetchOutcome {
            status: FetchStatus::FetchFailed,
            source: None,
            generation: self.store.get_configuration().generation,
            has_changes: false,
        };
        self.notify(&outcome);
        self.set_state(SyncState::Idle);

        Err(Error::AllSourcesFailed(Box::new(last_error)))
    }

    fn apply(&self, configuration: Configuration) -> FetchOutcome {
        self.set_state(SyncState::Applying);

        let source = configuration.source;
        let generation = configuration.generation;
        let previous = self.store.set_configuration(Arc::new(configuration));
        let has_changes = previous.source.is_none() || previous.generation != generation;

        log::debug!(target: "rox",
                    source:display = source.map_or("none".to_owned(), |s| s.to_string()),
                    generation,
                    has_changes;
                    "applied configuration");

        FetchOutcome {
            status: FetchStatus::AppliedFromNetwork,
            source,
            generation,
            has_changes,
        }
    }

    fn notify(&self, outcome: &FetchOutcome) {
        if let Some(handler) = &self.handler {
            handler.on_configuration_fetched(outcome);
        }
    }

    fn set_state(&self, state: SyncState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
