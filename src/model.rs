//! Rule model: configs, rows, conditional values and criteria as delivered by the server.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{value::ValueType, ConfigValue, Error, Result, Value};

/// Closed set of criterion operators.
///
/// Operators unknown to this client deserialize to [`Operator::Unknown`] and never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Operator {
    AlwaysTrue,
    PropIsOneOf,
    PropIsNotOneOf,
    PropEndsWithOneOf,
    PropDoesNotEndWithOneOf,
    PropStartsWithOneOf,
    PropDoesNotStartWithOneOf,
    PropContainsOneOf,
    PropDoesNotContainOneOf,
    HierarchicalMatch,
    InSeg,
    NotInSeg,
    InIntRange,
    PropGreaterThan,
    PropGreaterThanOrEqual,
    PropLessThan,
    PropLessThanOrEqual,
    PropMatches,
    PropDoesNotMatch,
    PropSemverLessThan,
    PropSemverEqual,
    PropSemverGreaterThan,
    PropBefore,
    PropAfter,
    #[serde(other)]
    Unknown,
}

impl Operator {
    /// Return `true` if the operator reads a caller-supplied property.
    pub fn reads_property(self) -> bool {
        !matches!(
            self,
            Operator::AlwaysTrue | Operator::InSeg | Operator::NotInSeg | Operator::Unknown
        )
    }

    /// Return `true` if the operator compares against a list of strings.
    fn expects_string_list(self) -> bool {
        matches!(
            self,
            Operator::PropIsOneOf
                | Operator::PropIsNotOneOf
                | Operator::PropEndsWithOneOf
                | Operator::PropDoesNotEndWithOneOf
                | Operator::PropStartsWithOneOf
                | Operator::PropDoesNotStartWithOneOf
                | Operator::PropContainsOneOf
                | Operator::PropDoesNotContainOneOf
        )
    }
}

/// A single predicate over the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    /// Name of the property to read. Empty for operators that do not read one.
    #[serde(default)]
    pub property_name: String,
    /// Operator to apply.
    pub operator: Operator,
    /// Value the property is compared against.
    #[serde(default)]
    pub value_to_match: Option<ConfigValue>,
}

impl Criterion {
    /// Create a criterion.
    pub fn new(
        property_name: impl Into<String>,
        operator: Operator,
        value_to_match: impl Into<ConfigValue>,
    ) -> Self {
        Criterion {
            property_name: property_name.into(),
            operator,
            value_to_match: Some(value_to_match.into()),
        }
    }

    /// Criterion that always matches.
    pub fn always_true() -> Self {
        Criterion {
            property_name: String::new(),
            operator: Operator::AlwaysTrue,
            value_to_match: None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.operator.reads_property() && self.property_name.is_empty() {
            return Err(format!("{:?} requires a property name", self.operator));
        }
        let value = self.value_to_match.as_ref().map(|v| &v.value);
        if self.operator.expects_string_list() && !matches!(value, Some(Value::StringList(_))) {
            return Err(format!("{:?} requires a string list to match", self.operator));
        }
        if self.operator == Operator::InIntRange && !matches!(value, Some(Value::IntRange(_))) {
            return Err("IN_INT_RANGE requires an int range to match".to_owned());
        }
        if matches!(self.operator, Operator::InSeg | Operator::NotInSeg)
            && !matches!(value, Some(Value::String(_)))
        {
            return Err(format!("{:?} requires a segment key", self.operator));
        }
        Ok(())
    }
}

/// A value guarded by a conjunction of criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalValue {
    /// All must match. Empty criteria always match.
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    /// Value produced when the criteria match.
    pub value: ConfigValue,
}

impl ConditionalValue {
    /// Create a conditional value.
    pub fn new(criteria: Vec<Criterion>, value: impl Into<ConfigValue>) -> Self {
        ConditionalValue {
            criteria,
            value: value.into(),
        }
    }

    /// Create a conditional value without criteria.
    pub fn always(value: impl Into<ConfigValue>) -> Self {
        Self::new(Vec::new(), value)
    }
}

/// Rules for one environment, or the environment-less default rules.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRow {
    /// Environment the row applies to. `None` marks the default row.
    #[serde(default)]
    pub project_env_id: Option<i64>,
    /// Properties visible to criteria while this row is being evaluated.
    #[serde(default)]
    pub properties: HashMap<String, ConfigValue>,
    /// Conditional values, tried in order.
    #[serde(default)]
    pub values: Vec<ConditionalValue>,
}

impl ConfigRow {
    /// Create a row.
    pub fn new(project_env_id: Option<i64>, values: Vec<ConditionalValue>) -> Self {
        ConfigRow {
            project_env_id,
            properties: HashMap::new(),
            values,
        }
    }

    /// Attach row-scoped properties.
    pub fn with_properties(
        mut self,
        properties: impl IntoIterator<Item = (impl Into<String>, impl Into<ConfigValue>)>,
    ) -> Self {
        self.properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }
}

/// Kind of config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ConfigType {
    Config,
    FeatureFlag,
    LogLevel,
    Segment,
    #[serde(other)]
    Unknown,
}

/// A keyed set of rules at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Key callers resolve.
    pub key: String,
    /// Monotonic version assigned by the server.
    pub id: i64,
    /// Kind of config.
    pub config_type: ConfigType,
    /// Declared type of the config's values, if known.
    #[serde(default)]
    pub value_type: Option<ValueType>,
    /// Rows, at most one per environment plus one default row.
    #[serde(default)]
    pub rows: Vec<ConfigRow>,
    /// Values the config may take, if the server restricts them.
    #[serde(default)]
    pub allowable_values: Vec<ConfigValue>,
}

impl Config {
    /// Create a config.
    pub fn new(key: impl Into<String>, id: i64, config_type: ConfigType, rows: Vec<ConfigRow>) -> Self {
        Config {
            key: key.into(),
            id,
            config_type,
            value_type: None,
            rows,
            allowable_values: Vec::new(),
        }
    }

    /// A config without any values represents a deletion of its key.
    pub fn is_tombstone(&self) -> bool {
        self.rows.iter().all(|row| row.values.is_empty())
    }

    /// Check structural invariants of the rules.
    pub fn validate(&self) -> Result<()> {
        let mut seen_envs = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if seen_envs.contains(&row.project_env_id) {
                return Err(Error::InvalidConfig {
                    key: self.key.clone(),
                    reason: format!("duplicate row for environment {:?}", row.project_env_id),
                });
            }
            seen_envs.push(row.project_env_id);

            for criterion in row.values.iter().flat_map(|v| v.criteria.iter()) {
                criterion.validate().map_err(|reason| Error::InvalidConfig {
                    key: self.key.clone(),
                    reason,
                })?;
            }
        }
        Ok(())
    }
}

/// Where a config came from. Audit only; never affects evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ProvenanceSource {
    BundledDefault,
    Remote,
    Streaming,
    LocalOverride,
    Unknown,
}

/// Audit metadata attached to a config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// Source layer.
    pub source: ProvenanceSource,
    /// Optional location within the source (file path, URL, ...).
    #[serde(default)]
    pub location: Option<String>,
}

impl Provenance {
    /// Provenance without a location.
    pub fn new(source: ProvenanceSource) -> Self {
        Provenance {
            source,
            location: None,
        }
    }

    /// Provenance with a location.
    pub fn with_location(source: ProvenanceSource, location: impl Into<String>) -> Self {
        Provenance {
            source,
            location: Some(location.into()),
        }
    }
}

/// An immutable config paired with its provenance, plus evaluation caches.
#[derive(Debug)]
pub struct ConfigElement {
    config: Config,
    provenance: Provenance,
    /// Compiled `PROP_MATCHES`/`PROP_DOES_NOT_MATCH` patterns keyed by their source text. Invalid
    /// patterns are absent.
    patterns: HashMap<String, Regex>,
    /// Row indices in evaluation order, keyed by active environment id.
    row_order: RwLock<HashMap<Option<i64>, Arc<[usize]>>>,
}

impl ConfigElement {
    /// Wrap a config.
    pub fn new(config: Config, provenance: Provenance) -> Self {
        let patterns = config
            .rows
            .iter()
            .flat_map(|row| row.values.iter())
            .flat_map(|value| value.criteria.iter())
            .filter(|c| matches!(c.operator, Operator::PropMatches | Operator::PropDoesNotMatch))
            .filter_map(|c| c.value_to_match.as_ref()?.value.as_str())
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some((pattern.to_owned(), regex)),
                Err(err) => {
                    log::debug!(target: "prefab",
                                key:display = config.key,
                                pattern;
                                "ignoring invalid pattern: {err}");
                    None
                }
            })
            .collect();

        ConfigElement {
            config,
            provenance,
            patterns,
            row_order: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Where the config came from.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Key of the wrapped config.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub(crate) fn pattern(&self, source: &str) -> Option<&Regex> {
        self.patterns.get(source)
    }

    /// Indices of the rows applicable to `environment_id`, environment row first, default row
    /// last. Rows scoped to other environments are excluded.
    pub fn row_order(&self, environment_id: Option<i64>) -> Arc<[usize]> {
        if let Ok(cache) = self.row_order.read() {
            if let Some(order) = cache.get(&environment_id) {
                return order.clone();
            }
        }

        let rows = &self.config.rows;
        let env_rows = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| environment_id.is_some() && row.project_env_id == environment_id);
        let default_rows = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.project_env_id.is_none());
        let order: Arc<[usize]> = env_rows.chain(default_rows).map(|(i, _)| i).collect();

        // Two threads computing the same order concurrently both insert identical values.
        if let Ok(mut cache) = self.row_order.write() {
            cache.insert(environment_id, order.clone());
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_row_config() -> Config {
        Config::new(
            "key",
            1,
            ConfigType::Config,
            vec![
                ConfigRow::new(None, vec![ConditionalValue::always("X")]),
                ConfigRow::new(Some(7), vec![ConditionalValue::always("Y")]),
            ],
        )
    }

    #[test]
    fn environment_row_sorts_before_default_row() {
        let element = ConfigElement::new(two_row_config(), Provenance::new(ProvenanceSource::Remote));
        assert_eq!(&*element.row_order(Some(7)), &[1, 0]);
        assert_eq!(&*element.row_order(Some(8)), &[0]);
        assert_eq!(&*element.row_order(None), &[0]);
        // memoized
        assert!(Arc::ptr_eq(&element.row_order(Some(7)), &element.row_order(Some(7))));
    }

    #[test]
    fn tombstone_detection() {
        assert!(Config::new("k", 1, ConfigType::Config, vec![]).is_tombstone());
        assert!(
            Config::new("k", 1, ConfigType::Config, vec![ConfigRow::new(None, vec![])])
                .is_tombstone()
        );
        assert!(!two_row_config().is_tombstone());
    }

    #[test]
    fn validate_rejects_property_operators_without_property() {
        let config = Config::new(
            "k",
            1,
            ConfigType::Config,
            vec![ConfigRow::new(
                None,
                vec![ConditionalValue::new(
                    vec![Criterion::new("", Operator::PropIsOneOf, vec!["a"])],
                    true,
                )],
            )],
        );
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn validate_rejects_scalar_for_list_operator() {
        let config = Config::new(
            "k",
            1,
            ConfigType::Config,
            vec![ConfigRow::new(
                None,
                vec![ConditionalValue::new(
                    vec![Criterion::new("user.key", Operator::PropIsOneOf, "a")],
                    true,
                )],
            )],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_environment_rows() {
        let mut config = two_row_config();
        config.rows.push(ConfigRow::new(Some(7), vec![]));
        assert!(config.validate().is_err());
        assert!(two_row_config().validate().is_ok());
    }

    #[test]
    fn unknown_operators_deserialize() {
        let criterion: Criterion = serde_json::from_str(
            r#"{"propertyName": "user.key", "operator": "PROP_IS_PRIME"}"#,
        )
        .unwrap();
        assert_eq!(criterion.operator, Operator::Unknown);
    }

    #[test]
    fn compiles_patterns_once() {
        let config = Config::new(
            "k",
            1,
            ConfigType::Config,
            vec![ConfigRow::new(
                None,
                vec![ConditionalValue::new(
                    vec![
                        Criterion::new("user.email", Operator::PropMatches, "^.*@example\\.com$"),
                        Criterion::new("user.email", Operator::PropDoesNotMatch, "(unclosed"),
                    ],
                    true,
                )],
            )],
        );
        let element = ConfigElement::new(config, Provenance::new(ProvenanceSource::Remote));
        assert!(element.pattern("^.*@example\\.com$").is_some());
        assert!(element.pattern("(unclosed").is_none());
    }
}
