//! Config values: the tagged union every rule produces and every context property carries.
use std::{fmt, time::Duration};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// A value together with its audit flag.
///
/// Confidential values are still evaluated normally but must never appear verbatim in logs or
/// telemetry; use [`ConfigValue::redacted`] when printing them.
///
/// # Examples
/// ```
/// # use prefab::{ConfigValue, Value};
/// let plain: ConfigValue = "example".into();
/// let secret = ConfigValue::confidential("hunter2");
/// assert_eq!(plain.value, Value::String("example".to_owned()));
/// assert!(secret.confidential);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValue {
    /// The underlying value.
    #[serde(flatten)]
    pub value: Value,
    /// Exclude this value from logs and telemetry.
    #[serde(default)]
    pub confidential: bool,
}

impl ConfigValue {
    /// Create a non-confidential value.
    pub fn new(value: impl Into<Value>) -> Self {
        ConfigValue {
            value: value.into(),
            confidential: false,
        }
    }

    /// Create a value that must be redacted in logs and telemetry.
    pub fn confidential(value: impl Into<Value>) -> Self {
        ConfigValue {
            value: value.into(),
            confidential: true,
        }
    }

    /// Printable form of the value that does not leak confidential data.
    ///
    /// Confidential values are rendered as `*****` followed by the first five hex digits of the
    /// md5 of their string form, so that operators can tell two secrets apart without seeing them.
    pub fn redacted(&self) -> String {
        if self.confidential {
            let digest = md5::compute(self.value.to_string());
            let hex = format!("{:x}", digest);
            format!("*****{}", &hex[..5])
        } else {
            self.value.to_string()
        }
    }
}

impl<T: Into<Value>> From<T> for ConfigValue {
    fn from(value: T) -> Self {
        ConfigValue::new(value)
    }
}

/// Tagged union over every kind of value a config can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    /// A string value.
    String(String),
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Double(f64),
    /// A boolean.
    Bool(bool),
    /// A list of strings.
    StringList(Vec<String>),
    /// A duration.
    Duration(Duration),
    /// A log level, used by `LOG_LEVEL` configs.
    LogLevel(LogLevel),
    /// A distribution over variants; resolved per evaluation.
    WeightedValues(WeightedValues),
    /// A reference to a value held outside the snapshot, resolved at call time.
    Provided(Provided),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Half-open integer range, used as the match value of `IN_INT_RANGE`.
    IntRange(IntRange),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Vec<&str>> for Value {
    fn from(value: Vec<&str>) -> Self {
        Self::StringList(value.into_iter().map(str::to_owned).collect())
    }
}

impl Value {
    /// Returns the string if the value is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if the value is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float if the value is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the boolean if the value is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the list if the value is a `StringList`.
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(list) => Some(list),
            _ => None,
        }
    }

    /// Returns the duration if the value is a `Duration`.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the log level if the value is a `LogLevel`.
    pub fn as_log_level(&self) -> Option<LogLevel> {
        match self {
            Self::LogLevel(level) => Some(*level),
            _ => None,
        }
    }

    /// Coerce a scalar into its string form. Lists, distributions, references and ranges have no
    /// single string form and return `None`.
    pub fn coerce_to_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Double(d) => Some(double_to_string(*d)),
            Self::Bool(b) => Some(b.to_string()),
            Self::LogLevel(level) => Some(level.as_str().to_owned()),
            Self::StringList(_)
            | Self::Duration(_)
            | Self::WeightedValues(_)
            | Self::Provided(_)
            | Self::Bytes(_)
            | Self::IntRange(_) => None,
        }
    }

    /// Whether the value is empty in the sense used by set-membership operators.
    pub(crate) fn is_empty_for_membership(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::StringList(list) => list.is_empty(),
            _ => false,
        }
    }
}

/// Integral doubles keep a trailing `.0`, the way other client implementations print them.
fn double_to_string(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e16 {
        format!("{d:.1}")
    } else {
        d.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::StringList(list) => write!(f, "[{}]", list.join(",")),
            Self::Duration(d) => write!(f, "{}ms", d.as_millis()),
            Self::LogLevel(level) => f.write_str(level.as_str()),
            Self::WeightedValues(wv) => write!(f, "weighted({} variants)", wv.weighted_values.len()),
            Self::Provided(p) => write!(f, "provided({:?}:{})", p.source, p.lookup),
            Self::Bytes(bytes) => write!(f, "bytes({})", bytes.len()),
            Self::IntRange(range) => write!(f, "{range}"),
        }
    }
}

/// Declared concrete type of a config, used to coerce indirectly provided values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ValueType {
    String,
    Int,
    Double,
    Bool,
    StringList,
    Duration,
    LogLevel,
    Bytes,
}

/// Log levels carried by `LOG_LEVEL` configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Upper-case name of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Map onto the `log` crate's filter. `log` has no fatal level, so FATAL maps to `Error`.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

/// A weighted distribution of values.
///
/// If all weights are zero, the first variant is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedValues {
    /// Variants in declared order. Order is significant for bucketing.
    pub weighted_values: Vec<WeightedValue>,
    /// Context property whose value pins a caller to a bucket. Without it selection is random.
    #[serde(default)]
    pub hash_by_property_name: Option<String>,
}

/// One variant of a [`WeightedValues`] distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedValue {
    /// Relative weight of the variant.
    pub weight: u32,
    /// Value selected when this variant wins.
    pub value: ConfigValue,
}

impl WeightedValues {
    /// Build a distribution from `(value, weight)` pairs.
    pub fn new<V: Into<ConfigValue>>(
        variants: impl IntoIterator<Item = (V, u32)>,
        hash_by_property_name: Option<&str>,
    ) -> Self {
        WeightedValues {
            weighted_values: variants
                .into_iter()
                .map(|(value, weight)| WeightedValue {
                    weight,
                    value: value.into(),
                })
                .collect(),
            hash_by_property_name: hash_by_property_name.map(str::to_owned),
        }
    }
}

/// Where an indirect value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvidedSource {
    /// Read from an environment variable.
    EnvVar,
    /// A source this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Indirect reference, resolved when the value is read rather than when the snapshot is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provided {
    /// Source kind.
    pub source: ProvidedSource,
    /// Name to look up in the source (e.g. the environment variable name).
    pub lookup: String,
}

impl Provided {
    /// Reference an environment variable.
    pub fn env_var(name: impl Into<String>) -> Self {
        Provided {
            source: ProvidedSource::EnvVar,
            lookup: name.into(),
        }
    }
}

/// Half-open range `[start, end)`; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntRange {
    /// Inclusive lower bound.
    #[serde(default)]
    pub start: Option<i64>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub end: Option<i64>,
}

impl IntRange {
    /// Return `true` if `v` falls inside the range.
    pub fn contains(&self, v: i64) -> bool {
        self.start.map_or(true, |start| v >= start) && self.end.map_or(true, |end| v < end)
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            Some(start) => write!(f, "[{start}, ")?,
            None => f.write_str("(-inf, ")?,
        }
        match self.end {
            Some(end) => write!(f, "{end})"),
            None => f.write_str("+inf)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_range_bounds() {
        let range = IntRange {
            start: Some(10),
            end: Some(20),
        };
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));

        let open = IntRange::default();
        assert!(open.contains(i64::MIN));
        assert!(open.contains(i64::MAX));

        let lower_only = IntRange {
            start: Some(0),
            end: None,
        };
        assert!(lower_only.contains(i64::MAX));
        assert!(!lower_only.contains(-1));
    }

    #[test]
    fn coerce_scalars_to_string() {
        assert_eq!(Value::from("a").coerce_to_string().as_deref(), Some("a"));
        assert_eq!(Value::Int(42).coerce_to_string().as_deref(), Some("42"));
        assert_eq!(Value::Bool(true).coerce_to_string().as_deref(), Some("true"));
        assert_eq!(Value::Double(1.5).coerce_to_string().as_deref(), Some("1.5"));
        assert_eq!(Value::Double(1.0).coerce_to_string().as_deref(), Some("1.0"));
        assert_eq!(Value::Double(-3.0).coerce_to_string().as_deref(), Some("-3.0"));
        assert_eq!(Value::from(vec!["a", "b"]).coerce_to_string(), None);
    }

    #[test]
    fn redacts_confidential_values() {
        let secret = ConfigValue::confidential("hunter2");
        let redacted = secret.redacted();
        assert!(redacted.starts_with("*****"));
        assert_eq!(redacted.len(), 10);
        assert!(!redacted.contains("hunter2"));

        assert_eq!(ConfigValue::new("public").redacted(), "public");
    }

    #[test]
    fn deserializes_tagged_values() {
        let value: ConfigValue = serde_json::from_str(r#"{"int": 5}"#).unwrap();
        assert_eq!(value, ConfigValue::new(5i64));

        let value: ConfigValue =
            serde_json::from_str(r#"{"string": "s3cr3t", "confidential": true}"#).unwrap();
        assert_eq!(value, ConfigValue::confidential("s3cr3t"));

        let value: ConfigValue = serde_json::from_str(
            r#"{"weightedValues": {"weightedValues": [{"weight": 1, "value": {"bool": true}}], "hashByPropertyName": "user.key"}}"#,
        )
        .unwrap();
        assert_eq!(
            value,
            ConfigValue::new(WeightedValues::new([(true, 1)], Some("user.key")))
        );
    }

    #[test]
    fn log_level_maps_onto_log_filters() {
        assert_eq!(LogLevel::Fatal.to_level_filter(), log::LevelFilter::Error);
        assert_eq!(LogLevel::Debug.to_level_filter(), log::LevelFilter::Debug);
    }
}
