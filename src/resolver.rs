//! Turning matches into values callers can use.
use crate::{
    ConfigValue, Error, Evaluator, LogLevel, LookupContext, Match, Provided, ProvidedSource,
    Snapshot, Value, ValueType,
};

/// Key prefix of `LOG_LEVEL` configs.
pub const LOG_LEVEL_PREFIX: &str = "log-level";

/// Source of environment variables for indirect references.
pub trait EnvLookup {
    /// Value of the variable `name`, or `None` if it is not set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<T: Fn(&str) -> Option<String>> EnvLookup for T {
    fn var(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Evaluates keys and reifies indirect references at read time.
///
/// Indirect values are not resolved when a snapshot is built because the referenced source can
/// change independently of the snapshot.
pub struct Resolver<'a> {
    evaluator: Evaluator,
    env: Box<dyn EnvLookup + Send + Sync + 'a>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver that reads indirect references from `env`.
    pub fn new(env: impl EnvLookup + Send + Sync + 'a) -> Self {
        Self::from_boxed(Box::new(env))
    }

    pub(crate) fn from_boxed(env: Box<dyn EnvLookup + Send + Sync + 'a>) -> Self {
        Resolver {
            evaluator: Evaluator::default(),
            env,
        }
    }

    /// Evaluate `key`, returning the full match record. Indirect references are left as is.
    pub fn get_match(&self, snapshot: &Snapshot, key: &str, context: &LookupContext) -> Option<Match> {
        self.evaluator.evaluate(snapshot, key, context)
    }

    /// Evaluate `key` and reify the result.
    pub fn get(&self, snapshot: &Snapshot, key: &str, context: &LookupContext) -> Option<ConfigValue> {
        self.get_match(snapshot, key, context)
            .map(|m| self.reify(&m))
    }

    /// Value of a match with indirect references resolved.
    pub fn reify(&self, m: &Match) -> ConfigValue {
        let Value::Provided(provided) = &m.value.value else {
            return m.value.clone();
        };
        ConfigValue {
            value: self.provided_value(m.key(), provided, m.element.config().value_type),
            confidential: m.value.confidential,
        }
    }

    /// Level configured for `logger_name`.
    ///
    /// Looks up `log-level.<logger_name>` first and walks up the dotted hierarchy, ending with
    /// the bare `log-level` key. The first config resolving to a log level wins.
    pub fn log_level_for(
        &self,
        snapshot: &Snapshot,
        logger_name: &str,
        context: &LookupContext,
    ) -> Option<LogLevel> {
        let mut name = logger_name;
        loop {
            let key = if name.is_empty() {
                LOG_LEVEL_PREFIX.to_owned()
            } else {
                format!("{LOG_LEVEL_PREFIX}.{name}")
            };
            if let Some(level) = self
                .get(snapshot, &key, context)
                .and_then(|value| value.value.as_log_level())
            {
                return Some(level);
            }

            if name.is_empty() {
                return None;
            }
            name = name.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }

    fn provided_value(&self, key: &str, provided: &Provided, value_type: Option<ValueType>) -> Value {
        match provided.source {
            ProvidedSource::EnvVar => {}
            ProvidedSource::Unknown => {
                log::error!(target: "prefab", key, lookup = provided.lookup.as_str(); "unsupported provided value source");
                return Value::String(String::new());
            }
        }

        let name = provided.lookup.as_str();
        let Some(raw) = self.env.var(name) else {
            let err = Error::MissingEnvVar {
                name: name.to_owned(),
            };
            log::error!(target: "prefab", key; "{err}");
            return Value::String(String::new());
        };

        let Some(value_type) = value_type else {
            return Value::String(raw);
        };
        match coerce(&raw, value_type) {
            Some(value) => value,
            None => {
                let err = Error::EnvVarParse {
                    name: name.to_owned(),
                    value_type,
                };
                log::error!(target: "prefab", key; "{err}");
                Value::String(raw)
            }
        }
    }
}

/// Parse an environment variable's text as `value_type`.
fn coerce(raw: &str, value_type: ValueType) -> Option<Value> {
    let trimmed = raw.trim();
    let value = match value_type {
        ValueType::String => Value::String(raw.to_owned()),
        ValueType::Int => Value::Int(trimmed.parse().ok()?),
        ValueType::Double => Value::Double(trimmed.parse().ok()?),
        ValueType::Bool => {
            if trimmed.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if trimmed.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                return None;
            }
        }
        ValueType::StringList => Value::StringList(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
        ValueType::LogLevel => {
            let level = [
                LogLevel::Trace,
                LogLevel::Debug,
                LogLevel::Info,
                LogLevel::Warn,
                LogLevel::Error,
                LogLevel::Fatal,
            ]
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))?;
            Value::LogLevel(level)
        }
        ValueType::Bytes => Value::Bytes(raw.as_bytes().to_vec()),
        ValueType::Duration => return None,
    };
    Some(value)
}
