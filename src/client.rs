use std::{
    sync::{Arc, Condvar, Mutex, PoisonError, RwLock},
    time::Duration,
};

use crate::{
    ambient,
    change::{ChangeDetector, ConfigChangeEvent, ConfigChangeListener},
    merge::{merge, ContextSources},
    resolver::Resolver,
    ClientConfig, Config, ConfigLoader, ConfigValue, ContextSet, Error, LogLevel, LookupContext,
    Match, Provenance, Result, Snapshot, SnapshotStore, TelemetrySink, Value,
};

/// One batch of server-delivered changes.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    /// Configs in delivery order, each with where it came from.
    pub configs: Vec<(Config, Provenance)>,
    /// New active environment. `None` keeps the current one.
    pub environment_id: Option<i64>,
    /// New server default context. `None` keeps the current one.
    pub default_context: Option<ContextSet>,
}

/// Writer-side state. Every update runs entirely under one lock so that id acceptance, the
/// highwater mark and the published snapshot can never disagree.
struct Writer {
    loader: ConfigLoader,
    environment_id: Option<i64>,
    default_context: ContextSet,
}

/// A client resolving config values against the latest snapshot.
///
/// Reads never block: each call loads the current snapshot once and evaluates against it. Updates
/// are fed in through [`apply_update`](Self::apply_update) by whatever transport the application
/// uses.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use prefab::{ClientConfig, ConfigClient};
/// let client = ConfigClient::new(ClientConfig::new());
/// assert_eq!(client.get("missing", None), None);
/// ```
pub struct ConfigClient<'a> {
    store: SnapshotStore,
    writer: Mutex<Writer>,
    listeners: RwLock<Vec<Arc<dyn ConfigChangeListener + Send + Sync + 'a>>>,
    resolver: Resolver<'a>,
    change_detector: ChangeDetector,
    telemetry_sink: Box<dyn TelemetrySink + Send + Sync + 'a>,
    namespace: Option<String>,
    global_context: ContextSet,
    /// Holds `true` once the first update has been applied.
    initialized: (Mutex<bool>, Condvar),
    initialization_timeout: Duration,
}

impl<'a> ConfigClient<'a> {
    /// Create a new `ConfigClient` using the specified configuration.
    ///
    /// The client starts out with a snapshot built from the bundled defaults and local overrides.
    pub fn new(config: ClientConfig<'a>) -> Self {
        let writer = Writer {
            loader: ConfigLoader::new(config.bundled_defaults, config.local_overrides),
            environment_id: None,
            default_context: ContextSet::new(),
        };

        let store = SnapshotStore::new();
        store.replace(Arc::new(writer.build_snapshot()));

        ConfigClient {
            store,
            writer: Mutex::new(writer),
            listeners: RwLock::new(Vec::new()),
            resolver: Resolver::from_boxed(config.env_lookup),
            change_detector: ChangeDetector::new(config.namespace.as_deref()),
            telemetry_sink: config.telemetry_sink,
            namespace: config.namespace,
            global_context: config.global_context,
            initialized: (Mutex::new(false), Condvar::new()),
            initialization_timeout: config.initialization_timeout,
        }
    }

    /// Apply one batch of server-delivered changes and publish the resulting snapshot.
    ///
    /// Stale configs are dropped. Listeners are notified before this returns, in registration
    /// order, with the returned events. Concurrent calls are serialized.
    pub fn apply_update(&self, update: ConfigUpdate) -> Vec<ConfigChangeEvent> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        for (config, provenance) in update.configs {
            writer.loader.apply(config, provenance);
        }
        if let Some(environment_id) = update.environment_id {
            writer.environment_id = Some(environment_id);
        }
        if let Some(default_context) = update.default_context {
            writer.default_context = default_context;
        }

        let snapshot = Arc::new(writer.build_snapshot());
        let previous = self.store.replace(snapshot.clone());
        let events = self.change_detector.diff(&previous, &snapshot);

        log::debug!(target: "prefab",
                    highwater_mark = writer.loader.highwater_mark(),
                    environment_id:? = snapshot.environment_id(),
                    keys = snapshot.len(),
                    changes = events.len();
                    "applied config update");

        if !events.is_empty() {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in listeners {
                listener.on_change(&events);
            }
        }

        self.mark_initialized();
        events
    }

    /// Highest config id accepted so far. A transport resumes delivery after this id.
    pub fn highwater_mark(&self) -> i64 {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .loader
            .highwater_mark()
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    /// Keys in the current snapshot.
    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Register a listener for changes published after this call.
    pub fn add_listener(&self, listener: impl ConfigChangeListener + Send + Sync + 'a) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Resolve `key` for `context`, reporting the match to the telemetry sink.
    ///
    /// `context` is merged with the thread's ambient context, the global context and the server
    /// default context.
    pub fn get(&self, key: &str, context: Option<&ContextSet>) -> Option<ConfigValue> {
        self.resolve(key, context, true)
    }

    /// Like [`get`](Self::get), without telemetry.
    pub fn get_untracked(&self, key: &str, context: Option<&ContextSet>) -> Option<ConfigValue> {
        self.resolve(key, context, false)
    }

    /// Full record of the resolution of `key`, with weighted values already resolved to a
    /// variant but indirect references left as is. Not reported to telemetry.
    pub fn get_match(&self, key: &str, context: Option<&ContextSet>) -> Option<Match> {
        let snapshot = self.store.snapshot();
        self.with_lookup(&snapshot, context, |lookup| {
            self.resolver.get_match(&snapshot, key, lookup)
        })
    }

    /// Resolve `key` as a string.
    pub fn get_string(&self, key: &str, context: Option<&ContextSet>) -> Option<String> {
        self.get_as(key, context, |value| match value {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    /// Resolve `key` as an integer.
    pub fn get_int(&self, key: &str, context: Option<&ContextSet>) -> Option<i64> {
        self.get_as(key, context, |value| value.as_int())
    }

    /// Resolve `key` as a double. Integers are widened.
    pub fn get_double(&self, key: &str, context: Option<&ContextSet>) -> Option<f64> {
        self.get_as(key, context, |value| match value {
            Value::Double(d) => Some(d),
            Value::Int(i) => Some(i as f64),
            _ => None,
        })
    }

    /// Resolve `key` as a boolean.
    pub fn get_bool(&self, key: &str, context: Option<&ContextSet>) -> Option<bool> {
        self.get_as(key, context, |value| value.as_bool())
    }

    /// Resolve `key` as a list of strings.
    pub fn get_string_list(&self, key: &str, context: Option<&ContextSet>) -> Option<Vec<String>> {
        self.get_as(key, context, |value| match value {
            Value::StringList(list) => Some(list),
            _ => None,
        })
    }

    /// Resolve `key` as a duration.
    pub fn get_duration(&self, key: &str, context: Option<&ContextSet>) -> Option<Duration> {
        self.get_as(key, context, |value| value.as_duration())
    }

    /// Return `true` if the feature flag `key` resolves to `true`. Missing or non-boolean flags are
    /// off.
    pub fn feature_is_on(&self, key: &str, context: Option<&ContextSet>) -> bool {
        self.get_bool(key, context).unwrap_or(false)
    }

    /// Level configured for `logger_name`. See [`Resolver::log_level_for`].
    pub fn log_level_for(&self, logger_name: &str) -> Option<LogLevel> {
        let snapshot = self.store.snapshot();
        self.with_lookup(&snapshot, None, |lookup| {
            self.resolver.log_level_for(&snapshot, logger_name, lookup)
        })
    }

    /// Block until the first update has been applied, or the initialization timeout elapses.
    pub fn wait_for_initialization(&self) -> Result<()> {
        let (lock, condvar) = &self.initialized;
        let initialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (initialized, timeout) = condvar
            .wait_timeout_while(initialized, self.initialization_timeout, |initialized| {
                !*initialized
            })
            .unwrap_or_else(PoisonError::into_inner);

        if *initialized {
            Ok(())
        } else {
            debug_assert!(timeout.timed_out());
            log::warn!(target: "prefab",
                       timeout:? = self.initialization_timeout;
                       "no configuration received before initialization timeout");
            Err(Error::InitializationTimeout)
        }
    }

    fn mark_initialized(&self) {
        let (lock, condvar) = &self.initialized;
        let mut initialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !*initialized {
            *initialized = true;
            condvar.notify_all();
        }
    }

    fn get_as<T>(
        &self,
        key: &str,
        context: Option<&ContextSet>,
        extract: impl FnOnce(Value) -> Option<T>,
    ) -> Option<T> {
        let value = self.get(key, context)?;
        let result = extract(value.value);
        if result.is_none() {
            log::debug!(target: "prefab", key; "config value has an unexpected type");
        }
        result
    }

    fn resolve(&self, key: &str, context: Option<&ContextSet>, tracked: bool) -> Option<ConfigValue> {
        let snapshot = self.store.snapshot();
        let m = self.with_lookup(&snapshot, context, |lookup| {
            self.resolver.get_match(&snapshot, key, lookup)
        })?;
        if tracked {
            self.telemetry_sink.on_match(&m);
        }
        Some(self.resolver.reify(&m))
    }

    /// Run `f` with the merged lookup context for one read. Reads without a passed or ambient
    /// context share the snapshot's cached base context.
    fn with_lookup<T>(
        &self,
        snapshot: &Snapshot,
        context: Option<&ContextSet>,
        f: impl FnOnce(&LookupContext) -> T,
    ) -> T {
        let lookup = ambient::with_current(|ambient| {
            if ambient.is_none() && context.is_none() {
                return None;
            }
            Some(self.lookup_context(snapshot, ambient, context))
        });
        match lookup {
            Some(lookup) => f(&lookup),
            None => f(snapshot.base_lookup(|| self.lookup_context(snapshot, None, None))),
        }
    }

    fn lookup_context(
        &self,
        snapshot: &Snapshot,
        ambient: Option<&ContextSet>,
        passed: Option<&ContextSet>,
    ) -> LookupContext {
        let merged = merge(ContextSources {
            global: Some(&self.global_context),
            server_default: Some(snapshot.default_context()),
            ambient,
            passed,
        });
        LookupContext::new(self.namespace.as_deref(), merged)
    }
}

impl Writer {
    fn build_snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.loader.calc_config(),
            self.environment_id,
            self.default_context.clone(),
        )
    }
}
