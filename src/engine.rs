use std::{collections::HashMap, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use chrono::Utc;

use crate::{
    analytics::{ClientProxy, ImpressionEvent, ImpressionExperiment, ImpressionHandler},
    configuration_store::{Configuration, ConfigurationStore},
    entities::Declaration,
    registerer::{RegisteredNamespace, Registerer},
    repositories::FlagSetting,
    roxx::{Expression, ExpressionEnvironment, FlagBinding, Parser},
    sync::{
        ConfigurationSync, FetchOutcome, PollerThread, PollerThreadConfig, SourceKind,
        StateSender, SyncState,
    },
    Context, EngineConfig, MergedContext, Result,
};

/// Shared state behind every [`Flag`](crate::Flag) and [`Variant`](crate::Variant).
pub(crate) struct Core {
    pub(crate) store: Arc<ConfigurationStore>,
    pub(crate) flags: crate::repositories::FlagRepository,
    pub(crate) global_context: ArcSwap<Context>,
    parser: Parser,
    impression_handler: Box<dyn ImpressionHandler + Send + Sync>,
    analytics: Option<ClientProxy>,
}

impl Core {
    pub(crate) fn new(
        store: Arc<ConfigurationStore>,
        global_context: Context,
        impression_handler: Box<dyn ImpressionHandler + Send + Sync>,
        analytics: Option<ClientProxy>,
    ) -> Core {
        Core {
            store,
            flags: Default::default(),
            global_context: ArcSwap::from_pointee(global_context),
            parser: Parser::new(),
            impression_handler,
            analytics,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Core {
        Core::new(
            Arc::new(ConfigurationStore::new()),
            Context::new(),
            Box::new(crate::analytics::NoopImpressionHandler),
            None,
        )
    }

    /// Evaluate the flag described by `setting`. Always returns one of its options.
    pub(crate) fn evaluate(&self, setting: &FlagSetting, context: &Context) -> String {
        // One snapshot for the whole evaluation, including nested flags and target groups.
        let configuration = self.store.get_configuration();
        let Some(experiment) = configuration.experiments.get_by_flag(&setting.name) else {
            return setting.default_value.clone();
        };

        let global = self.global_context.load();
        let merged = MergedContext::new(&global, context);
        let environment = SnapshotEnvironment {
            configuration: &configuration,
            flags: self.flags.snapshot(),
            stickiness_property: experiment.stickiness_property.as_deref(),
        };

        let result = self
            .parser
            .evaluate(&experiment.condition, &merged, &environment);
        let value = match result.as_string() {
            Some(value) if setting.options.contains(&value) => value,
            _ => setting.default_value.clone(),
        };

        log::trace!(target: "rox",
                    flag:display = setting.name,
                    experiment:display = experiment.id,
                    value:display = value;
                    "evaluated flag");

        self.report(ImpressionEvent {
            flag_name: setting.name.clone(),
            value: value.clone(),
            experiment: Some(ImpressionExperiment {
                id: experiment.id.clone(),
                name: experiment.name.clone(),
            }),
            context: merged.snapshot(),
            timestamp: Utc::now(),
        });

        value
    }

    fn report(&self, event: ImpressionEvent) {
        match &self.analytics {
            Some(analytics) => {
                self.impression_handler.on_impression(event.clone());
                analytics.track(event);
            }
            None => self.impression_handler.on_impression(event),
        }
    }
}

/// What expressions see while evaluating against one configuration snapshot.
struct SnapshotEnvironment<'a> {
    configuration: &'a Configuration,
    flags: Arc<HashMap<String, Arc<FlagSetting>>>,
    stickiness_property: Option<&'a str>,
}

impl ExpressionEnvironment for SnapshotEnvironment<'_> {
    fn target_group_condition(&self, id: &str) -> Option<&Expression> {
        self.configuration
            .target_groups
            .get_by_id(id)
            .map(|target_group| &target_group.condition)
    }

    fn flag_binding(&self, name: &str) -> FlagBinding<'_> {
        let setting = self.flags.get(name);
        FlagBinding {
            condition: self
                .configuration
                .experiments
                .get_by_flag(name)
                .map(|experiment| &experiment.condition),
            default_value: setting.map(|setting| setting.default_value.as_str()),
            options: setting.map(|setting| setting.options.as_slice()),
        }
    }

    fn stickiness_property(&self) -> Option<&str> {
        self.stickiness_property
    }
}

/// The feature flag engine. Construct it once at startup with [`EngineConfig::to_engine`].
///
/// # Examples
/// ```no_run
/// # use rox::{Context, DefaultEntityProvider, EngineConfig, EntityProvider};
/// let engine = EngineConfig::from_app_key("app-key").to_engine().unwrap();
/// let app = engine
///     .register("app", [("checkout", DefaultEntityProvider.create_flag(false))])
///     .unwrap();
/// let poller = engine.start_poller_thread().unwrap();
/// poller.wait_for_configuration().ok();
///
/// let context = [("uid".to_owned(), "user-3".into())].into_iter().collect::<Context>();
/// if app.flag("checkout").unwrap().is_enabled(&context) {
///     // new checkout
/// }
/// ```
pub struct Engine {
    core: Arc<Core>,
    registerer: Registerer,
    sync: Arc<ConfigurationSync>,
    poller_config: PollerThreadConfig,
    state_sender: StateSender,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig) -> Result<Engine> {
        let parts = config.into_parts()?;

        let store = Arc::new(ConfigurationStore::new());
        let mut sync = ConfigurationSync::new(parts.sources, Arc::clone(&store));
        if let Some(handler) = parts.configuration_fetched_handler {
            sync = sync.with_handler(handler);
        }

        let core = Arc::new(Core::new(
            store,
            parts.global_context,
            parts.impression_handler,
            parts.analytics,
        ));

        Ok(Engine {
            registerer: Registerer::new(Arc::clone(&core)),
            core,
            sync: Arc::new(sync),
            poller_config: parts.poller_config,
            state_sender: parts.state_sender,
        })
    }

    /// Register `declarations` under `namespace`.
    ///
    /// Names are registered as `namespace.name`, or as `name` for the empty namespace. Either all
    /// declarations are registered or none is.
    ///
    /// # Errors
    ///
    /// - [`Error::NamespaceAlreadyRegistered`](crate::Error::NamespaceAlreadyRegistered)
    /// - [`Error::FlagAlreadyRegistered`](crate::Error::FlagAlreadyRegistered)
    /// - [`Error::InvalidDefaultValue`](crate::Error::InvalidDefaultValue)
    /// - [`Error::EmptyFlagName`](crate::Error::EmptyFlagName)
    pub fn register<N: Into<String>>(
        &self,
        namespace: &str,
        declarations: impl IntoIterator<Item = (N, Declaration)>,
    ) -> Result<RegisteredNamespace> {
        self.registerer.register(namespace, declarations)
    }

    /// Start a thread that syncs configuration periodically.
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) if the thread failed to start.
    pub fn start_poller_thread(&self) -> Result<PollerThread> {
        Ok(PollerThread::start_with_config(
            Arc::clone(&self.sync),
            self.poller_config.clone(),
        )?)
    }

    /// Run a single sync cycle on the calling thread.
    pub fn fetch(&self) -> Result<FetchOutcome> {
        self.sync.sync_once()
    }

    /// Report the registered flags to the state store on the calling thread.
    ///
    /// Call it after registering flags. Returns where the state was found or stored.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`](crate::Error::Network) if the state could not be delivered.
    /// - [`Error::StateResponseParse`](crate::Error::StateResponseParse)
    pub fn send_state(&self) -> Result<SourceKind> {
        self.state_sender.send(&self.core.flags.snapshot())
    }

    /// Current sync phase.
    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    /// The active configuration snapshot.
    pub fn configuration(&self) -> Arc<Configuration> {
        self.core.store.get_configuration()
    }

    /// Replace the global context. Request-local context always takes precedence over it.
    pub fn set_global_context(&self, context: Context) {
        self.core.global_context.store(Arc::new(context));
    }

    /// Deliver buffered impressions and stop the analytics worker, waiting at most `timeout`.
    ///
    /// Flags keep evaluating afterwards, but impressions are no longer reported to analytics.
    /// Returns `false` if buffered impressions could not be delivered in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        match &self.core.analytics {
            Some(analytics) => analytics.shutdown(timeout),
            None => true,
        }
    }
}
