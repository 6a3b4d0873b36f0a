//! Core of the Prefab dynamic configuration and feature flag client.
//!
//! # Overview
//!
//! A [`ConfigClient`] holds an immutable [`Snapshot`] of keyed configs and resolves values from it
//! for a caller-supplied [`ContextSet`]. Each config carries rows of rules: a row for the active
//! environment is tried before the default row, and within a row the first conditional value
//! whose criteria all match wins. Values may be weighted distributions, split deterministically
//! by a context property, or indirect references read from the environment when resolved.
//!
//! Updates from the server are fed in through [`ConfigClient::apply_update`]. Out-of-order
//! deliveries are dropped, a new snapshot is published atomically, and registered
//! [`ConfigChangeListener`]s are told which keys changed.
//!
//! ```
//! # use prefab::{ClientConfig, ConditionalValue, Config, ConfigRow, ConfigType, ConfigUpdate,
//! #              Context, ContextSet, Criterion, Operator, Provenance, ProvenanceSource};
//! let client = ClientConfig::new().to_client();
//! client.apply_update(ConfigUpdate {
//!     configs: vec![(
//!         Config::new("new-checkout", 1, ConfigType::FeatureFlag, vec![ConfigRow::new(
//!             None,
//!             vec![
//!                 ConditionalValue::new(
//!                     vec![Criterion::new("user.plan", Operator::PropIsOneOf, vec!["pro"])],
//!                     true,
//!                 ),
//!                 ConditionalValue::always(false),
//!             ],
//!         )]),
//!         Provenance::new(ProvenanceSource::Remote),
//!     )],
//!     ..ConfigUpdate::default()
//! });
//!
//! let user = ContextSet::from(Context::new("user").with("plan", "pro"));
//! assert!(client.feature_is_on("new-checkout", Some(&user)));
//! ```
//!
//! # Error Handling
//!
//! Resolution does not fail: a missing key, a config without a matching rule and a malformed
//! rule all resolve to `None` (or to the fallback described on each getter). Errors are
//! represented by the [`Error`] enum and are only returned from client startup
//! ([`ConfigClient::wait_for_initialization`]) and config validation ([`Config::validate`]).
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `"prefab"` target
//! and structured key-values. Expected conditions such as missing keys are logged at `trace`,
//! rules that cannot be evaluated at `debug`, and failures to resolve indirect references at
//! `error`. Consider integrating a `log`-compatible logger implementation for better visibility.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod ambient;
mod change;
mod client;
mod config;
mod context;
mod error;
mod eval;
mod loader;
pub mod merge;
mod model;
mod resolver;
pub mod sharder;
mod snapshot_store;
mod telemetry;
mod value;
pub mod weighted;

pub use change::{ChangeDetector, ConfigChangeEvent, ConfigChangeListener};
pub use client::{ConfigClient, ConfigUpdate};
pub use config::ClientConfig;
pub use context::{Context, ContextSet, LookupContext, CURRENT_TIME_KEY, NAMESPACE_KEY};
pub use error::{Error, EvaluationError, Result};
pub use eval::{EvaluatedCriterion, Evaluator, Match, MAX_SEGMENT_DEPTH};
pub use loader::{ApplyOutcome, ConfigLoader};
pub use model::{
    ConditionalValue, Config, ConfigElement, ConfigRow, ConfigType, Criterion, Operator,
    Provenance, ProvenanceSource,
};
pub use resolver::{EnvLookup, ProcessEnv, Resolver, LOG_LEVEL_PREFIX};
pub use snapshot_store::{Snapshot, SnapshotStore};
pub use telemetry::{NoopTelemetrySink, TelemetrySink};
pub use value::{
    ConfigValue, IntRange, LogLevel, Provided, ProvidedSource, Value, ValueType, WeightedValue,
    WeightedValues,
};
