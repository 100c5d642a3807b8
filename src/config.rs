use std::{sync::Arc, time::Duration};

use crate::{
    analytics::{
        AnalyticsConfig, ClientProxy, HttpImpressionSink, ImpressionHandler, ImpressionSink,
        NoopImpressionHandler,
    },
    sync::{
        ConfigurationFetchedHandler, ConfigurationSource, HttpSource, PollerThreadConfig,
        StateSender,
    },
    Context, Engine, Result,
};

/// Configuration for [`Engine`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use rox::{EngineConfig, ImpressionEvent};
/// let engine = EngineConfig::from_app_key("app-key")
///     .poll_interval(Duration::from_secs(120))
///     .impression_handler(|event: ImpressionEvent| {
///         println!("{:?}", event);
///     })
///     .to_engine()
///     .unwrap();
/// ```
pub struct EngineConfig {
    pub(crate) app_key: String,
    pub(crate) cdn_url: String,
    pub(crate) api_url: String,
    pub(crate) state_url: String,
    pub(crate) roxy_url: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) global_context: Context,
    pub(crate) impression_handler: Box<dyn ImpressionHandler + Send + Sync>,
    pub(crate) configuration_fetched_handler:
        Option<Box<dyn ConfigurationFetchedHandler + Send + Sync>>,
    pub(crate) analytics: Option<AnalyticsConfig>,
    pub(crate) impression_sink: Option<Arc<dyn ImpressionSink + Send + Sync>>,
    pub(crate) sources: Vec<Box<dyn ConfigurationSource>>,
}

/// [`EngineConfig`] resolved into the pieces the engine is built from.
pub(crate) struct EngineParts {
    pub(crate) sources: Vec<Box<dyn ConfigurationSource>>,
    pub(crate) configuration_fetched_handler:
        Option<Box<dyn ConfigurationFetchedHandler + Send + Sync>>,
    pub(crate) global_context: Context,
    pub(crate) impression_handler: Box<dyn ImpressionHandler + Send + Sync>,
    pub(crate) analytics: Option<ClientProxy>,
    pub(crate) poller_config: PollerThreadConfig,
    pub(crate) state_sender: StateSender,
}

impl EngineConfig {
    /// Default CDN serving configuration documents.
    pub const DEFAULT_CDN_URL: &'static str = "https://conf.rollout.io";

    /// Default configuration API, used when the CDN fails.
    pub const DEFAULT_API_URL: &'static str = "https://x-api.rollout.io";

    /// Default state store, see [`Engine::send_state`].
    pub const DEFAULT_STATE_URL: &'static str = "https://statestore.rollout.io";

    /// Create a default configuration for the application identified by `app_key`.
    ///
    /// ```
    /// # use rox::EngineConfig;
    /// EngineConfig::from_app_key("app-key");
    /// ```
    pub fn from_app_key(app_key: impl Into<String>) -> Self {
        EngineConfig {
            app_key: app_key.into(),
            cdn_url: EngineConfig::DEFAULT_CDN_URL.to_owned(),
            api_url: EngineConfig::DEFAULT_API_URL.to_owned(),
            state_url: EngineConfig::DEFAULT_STATE_URL.to_owned(),
            roxy_url: None,
            poll_interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            poll_jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
            global_context: Context::new(),
            impression_handler: Box::new(NoopImpressionHandler),
            configuration_fetched_handler: None,
            analytics: None,
            impression_sink: None,
            sources: Vec::new(),
        }
    }

    /// Override the CDN base URL. Clients should use the default setting in most cases.
    pub fn cdn_url(mut self, cdn_url: impl Into<String>) -> Self {
        self.cdn_url = cdn_url.into();
        self
    }

    /// Override the configuration API base URL. Clients should use the default setting in most
    /// cases.
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Override the state store base URL. Clients should use the default setting in most cases.
    pub fn state_url(mut self, state_url: impl Into<String>) -> Self {
        self.state_url = state_url.into();
        self
    }

    /// Also fetch configuration from a Roxy proxy, after the CDN and the API.
    pub fn roxy_url(mut self, roxy_url: impl Into<String>) -> Self {
        self.roxy_url = Some(roxy_url.into());
        self
    }

    /// Time between the starts of two configuration syncs.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Maximum random duration subtracted from each poll interval.
    pub fn poll_jitter(mut self, poll_jitter: Duration) -> Self {
        self.poll_jitter = poll_jitter;
        self
    }

    /// Context every evaluation falls back to. Can be replaced later with
    /// [`Engine::set_global_context`].
    pub fn global_context(mut self, global_context: Context) -> Self {
        self.global_context = global_context;
        self
    }

    /// Set the handler called synchronously with every impression.
    pub fn impression_handler(
        mut self,
        impression_handler: impl ImpressionHandler + Send + Sync + 'static,
    ) -> Self {
        self.impression_handler = Box::new(impression_handler);
        self
    }

    /// Set the handler called after every configuration sync.
    pub fn configuration_fetched_handler(
        mut self,
        handler: impl ConfigurationFetchedHandler + Send + Sync + 'static,
    ) -> Self {
        self.configuration_fetched_handler = Some(Box::new(handler));
        self
    }

    /// Report impressions to an analytics backend.
    pub fn analytics(mut self, analytics: AnalyticsConfig) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Deliver impression batches to `sink` instead of posting them to
    /// [`AnalyticsConfig::ingestion_url`]. Has no effect unless [`EngineConfig::analytics`] is set.
    pub fn impression_sink(mut self, sink: impl ImpressionSink + Send + Sync + 'static) -> Self {
        self.impression_sink = Some(Arc::new(sink));
        self
    }

    /// Fetch configuration from `source`. Once any source is added this way, the HTTP sources are
    /// not used. Sources are tried in the order they were added.
    pub fn configuration_source(mut self, source: impl ConfigurationSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Create a new [`Engine`] using the specified configuration.
    ///
    /// No network requests are made until [`Engine::fetch`] or [`Engine::start_poller_thread`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBaseUrl`](crate::Error::InvalidBaseUrl) if any of the URLs is invalid.
    pub fn to_engine(self) -> Result<Engine> {
        Engine::new(self)
    }

    pub(crate) fn into_parts(self) -> Result<EngineParts> {
        let client = reqwest::blocking::Client::new();
        let state_sender =
            StateSender::new(client.clone(), &self.state_url, &self.api_url, &self.app_key)?;

        let sources = if self.sources.is_empty() {
            let mut sources: Vec<Box<dyn ConfigurationSource>> = vec![
                Box::new(HttpSource::cdn(client.clone(), &self.cdn_url, &self.app_key)?),
                Box::new(HttpSource::api(client.clone(), &self.api_url, &self.app_key)?),
            ];
            if let Some(roxy_url) = &self.roxy_url {
                sources.push(Box::new(HttpSource::roxy(client.clone(), roxy_url)?));
            }
            sources
        } else {
            self.sources
        };

        let analytics = match self.analytics {
            Some(config) => {
                let sink: Arc<dyn ImpressionSink + Send + Sync> = match self.impression_sink {
                    Some(sink) => sink,
                    None => Arc::new(HttpImpressionSink::new(
                        client,
                        &config.ingestion_url,
                        &config.write_key,
                    )?),
                };
                Some(ClientProxy::new(sink, config))
            }
            None => None,
        };

        Ok(EngineParts {
            sources,
            configuration_fetched_handler: self.configuration_fetched_handler,
            global_context: self.global_context,
            impression_handler: self.impression_handler,
            analytics,
            poller_config: PollerThreadConfig::new()
                .with_interval(self.poll_interval)
                .with_jitter(self.poll_jitter),
            state_sender,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::EngineConfig;
    use crate::{analytics::AnalyticsConfig, sync::SourceKind, Error};

    #[test]
    fn default_sources() {
        let parts = EngineConfig::from_app_key("app-key").into_parts().unwrap();

        let kinds: Vec<_> = parts.sources.iter().map(|source| source.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::Cdn, SourceKind::Api]);
        assert!(parts.analytics.is_none());
    }

    #[test]
    fn roxy_is_tried_last() {
        let parts = EngineConfig::from_app_key("app-key")
            .roxy_url("http://localhost:4444")
            .poll_interval(Duration::from_secs(5))
            .into_parts()
            .unwrap();

        let kinds: Vec<_> = parts.sources.iter().map(|source| source.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::Cdn, SourceKind::Api, SourceKind::Roxy]);
        assert_eq!(parts.poller_config.interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_url() {
        let result = EngineConfig::from_app_key("app-key").cdn_url("::").to_engine();
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));

        let result = EngineConfig::from_app_key("app-key").state_url("::").to_engine();
        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }

    #[test]
    fn analytics_proxy_is_lazy() {
        let parts = EngineConfig::from_app_key("app-key")
            .analytics(AnalyticsConfig::new("https://ingest.example.com/batch", "write-key"))
            .into_parts()
            .unwrap();

        let analytics = parts.analytics.unwrap();
        assert!(!analytics.is_started());
    }
}
