//! A feature flag and experimentation engine.
//!
//! # Overview
//!
//! The engine answers "is this capability enabled for this request?" without redeploying. It
//! periodically pulls a configuration document describing experiments and target groups, and
//! evaluates targeting expressions against a per-request [`Context`] entirely in-process.
//!
//! Flags are declared in code with an [`EntityProvider`] and registered under a namespace with
//! [`Engine::register`]. The returned [`Flag`] and [`Variant`] handles are evaluated with
//! [`Flag::is_enabled`] and [`Variant::value`]; until a configuration arrives, or when no
//! experiment applies, they return their declared defaults.
//!
//! ```no_run
//! # use rox::{Context, DefaultEntityProvider, EngineConfig, EntityProvider};
//! let engine = EngineConfig::from_app_key("app-key").to_engine().unwrap();
//! let app = engine
//!     .register("app", [("checkout", DefaultEntityProvider.create_flag(false))])
//!     .unwrap();
//! let _poller = engine.start_poller_thread().unwrap();
//!
//! let context: Context = [("uid".to_owned(), "user-3".into())].into_iter().collect();
//! let enabled = app.flag("checkout").unwrap().is_enabled(&context);
//! ```
//!
//! # Targeting expressions
//!
//! Experiment conditions are written in a small prefix expression language, see [`roxx`].
//!
//! # Impressions
//!
//! Every value served by a flag with a bound experiment produces an [`ImpressionEvent`]. Provide
//! an [`ImpressionHandler`] to receive them synchronously, and an [`AnalyticsConfig`] to have them
//! batched and delivered in the background.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Flag evaluation never returns errors: anything wrong with the configuration results in the
//! default value. Errors are returned from registration, which usually indicates a programming
//! mistake, and from configuration sync.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into engine operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod analytics;
pub mod bucketing;
mod config;
pub mod configuration_store;
mod context;
mod engine;
mod entities;
mod error;
mod registerer;
pub mod repositories;
pub mod roxx;
pub mod sync;
#[cfg(test)]
mod test_server;

pub use analytics::{AnalyticsConfig, ImpressionEvent, ImpressionHandler};
pub use config::EngineConfig;
pub use context::{Context, ContextValue, MergedContext};
pub use engine::Engine;
pub use entities::{DefaultEntityProvider, Declaration, EntityKind, EntityProvider, Flag, Variant};
pub use error::{Error, Result};
pub use registerer::RegisteredNamespace;
pub use sync::{FetchOutcome, FetchStatus, PollerThread, SourceKind, StateSender};
