use std::sync::Arc;

use crate::sync::SourceKind;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the engine.
///
/// Flag evaluation never returns an error: the worst case there is the default value. The
/// variants below come from registration (programming mistakes that should fail at startup),
/// configuration sync and analytics delivery.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The namespace has already been registered with this engine.
    #[error("namespace {0:?} is already registered")]
    NamespaceAlreadyRegistered(String),

    /// A flag with the same full name has already been registered.
    #[error("flag {0:?} is already registered")]
    FlagAlreadyRegistered(String),

    /// Flag or variant name is empty.
    #[error("flag name must not be empty")]
    EmptyFlagName,

    /// Variant default value is not one of its declared options.
    #[error("default value {default:?} of {name:?} is not one of the declared options")]
    InvalidDefaultValue {
        /// Full flag name.
        name: String,
        /// The offending default.
        default: String,
    },

    /// Invalid base URL configuration.
    #[error("invalid base url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The source has no configuration for this application.
    #[error("configuration not found on {0}")]
    NotFound(SourceKind),

    /// Source answered with something that is not a configuration document.
    #[error("error parsing configuration document")]
    ConfigurationParse(Arc<serde_json::Error>),

    /// Document parsed, but is not internally consistent.
    #[error("invalid configuration document: {0}")]
    InvalidConfiguration(String),

    /// Every configured source failed. Holds the last error.
    #[error("all configuration sources failed")]
    AllSourcesFailed(#[source] Box<Error>),

    /// No configuration sources are configured.
    #[error("no configuration sources configured")]
    NoSources,

    /// The state store answered with something that is not JSON.
    #[error("error parsing state store response")]
    StateResponseParse(Arc<serde_json::Error>),

    /// Impression delivery failed.
    #[error("failed to deliver impressions: {0}")]
    Delivery(String),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// The poller thread was stopped before its first sync cycle finished.
    #[error("poller thread stopped before fetching configuration")]
    PollerThreadStopped,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParse(Arc::new(value))
    }
}
