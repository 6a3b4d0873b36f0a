use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use semver::Version;

use crate::{ConfigElement, ConfigValue, Operator, Value};

impl Operator {
    /// Apply a property operator. Returns `false` if the operator cannot be applied or there's a
    /// misconfiguration.
    ///
    /// Segment operators need the evaluator and are handled there; they never match here.
    pub(crate) fn eval(
        self,
        property: Option<&ConfigValue>,
        to_match: Option<&ConfigValue>,
        element: &ConfigElement,
    ) -> bool {
        self.try_eval(
            property.map(|v| &v.value),
            to_match.map(|v| &v.value),
            element,
        )
        .unwrap_or(false)
    }

    /// Try applying the operator, returning `None` if it cannot be applied.
    fn try_eval(
        self,
        property: Option<&Value>,
        to_match: Option<&Value>,
        element: &ConfigElement,
    ) -> Option<bool> {
        match self {
            Self::AlwaysTrue => Some(true),

            Self::PropIsOneOf | Self::PropIsNotOneOf => {
                let Some(Value::StringList(candidates)) = to_match else {
                    return None;
                };
                let is_one_of = property
                    .filter(|v| !v.is_empty_for_membership())
                    .map_or(false, |v| {
                        property_strings(v).iter().any(|s| candidates.contains(s))
                    });
                Some(is_one_of == (self == Self::PropIsOneOf))
            }

            Self::PropEndsWithOneOf
            | Self::PropDoesNotEndWithOneOf
            | Self::PropStartsWithOneOf
            | Self::PropDoesNotStartWithOneOf
            | Self::PropContainsOneOf
            | Self::PropDoesNotContainOneOf => {
                let Some(Value::StringList(candidates)) = to_match else {
                    return None;
                };
                let hit = match property {
                    Some(Value::String(s)) => candidates.iter().any(|candidate| match self {
                        Self::PropEndsWithOneOf | Self::PropDoesNotEndWithOneOf => {
                            s.ends_with(candidate.as_str())
                        }
                        Self::PropStartsWithOneOf | Self::PropDoesNotStartWithOneOf => {
                            s.starts_with(candidate.as_str())
                        }
                        _ => s.contains(candidate.as_str()),
                    }),
                    _ => false,
                };
                let positive = matches!(
                    self,
                    Self::PropEndsWithOneOf | Self::PropStartsWithOneOf | Self::PropContainsOneOf
                );
                Some(hit == positive)
            }

            Self::HierarchicalMatch => {
                let (Some(Value::String(s)), Some(Value::String(pattern))) = (property, to_match)
                else {
                    return None;
                };
                Some(s.starts_with(pattern.as_str()))
            }

            Self::InIntRange => {
                let (Some(Value::Int(i)), Some(Value::IntRange(range))) = (property, to_match)
                else {
                    return None;
                };
                Some(range.contains(*i))
            }

            Self::PropGreaterThan
            | Self::PropGreaterThanOrEqual
            | Self::PropLessThan
            | Self::PropLessThanOrEqual => {
                let ordering = compare_numbers(property?, to_match?)?;
                Some(match self {
                    Self::PropGreaterThan => ordering == Ordering::Greater,
                    Self::PropGreaterThanOrEqual => ordering != Ordering::Less,
                    Self::PropLessThan => ordering == Ordering::Less,
                    Self::PropLessThanOrEqual => ordering != Ordering::Greater,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::PropMatches | Self::PropDoesNotMatch => {
                let (Some(Value::String(s)), Some(Value::String(pattern))) = (property, to_match)
                else {
                    return None;
                };
                let matches = match element.pattern(pattern) {
                    Some(regex) => regex.is_match(s),
                    None => regex::Regex::new(pattern).ok()?.is_match(s),
                };
                Some(matches == (self == Self::PropMatches))
            }

            Self::PropSemverLessThan | Self::PropSemverEqual | Self::PropSemverGreaterThan => {
                let (Some(Value::String(s)), Some(Value::String(target))) = (property, to_match)
                else {
                    return None;
                };
                let version = Version::parse(s.trim()).ok()?;
                let target = Version::parse(target.trim()).ok()?;
                Some(match self {
                    Self::PropSemverLessThan => version < target,
                    Self::PropSemverEqual => version == target,
                    Self::PropSemverGreaterThan => version > target,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Self::PropBefore | Self::PropAfter => {
                let when = as_epoch_millis(property?)?;
                let boundary = as_epoch_millis(to_match?)?;
                Some(if self == Self::PropBefore {
                    when < boundary
                } else {
                    when > boundary
                })
            }

            // Segment membership needs recursive evaluation and is resolved by the evaluator.
            Self::InSeg | Self::NotInSeg => None,

            Self::Unknown => None,
        }
    }
}

/// Strings a property contributes to set membership: every member of a list, or the single
/// coerced string of a scalar.
fn property_strings(value: &Value) -> Vec<String> {
    match value {
        Value::StringList(list) => list.clone(),
        other => other.coerce_to_string().into_iter().collect(),
    }
}

/// Compare two numeric values. Two integers compare exactly; any other combination compares as
/// doubles.
fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            as_f64(a)?.partial_cmp(&as_f64(b)?)
        }
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

/// Interpret a value as a point in time: integer epoch milliseconds or an RFC 3339 string.
fn as_epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Int(millis) => Some(*millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc).timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Config, ConfigElement, ConfigType, ConfigValue, IntRange, Operator, Provenance,
        ProvenanceSource,
    };

    fn element() -> ConfigElement {
        ConfigElement::new(
            Config::new("k", 1, ConfigType::Config, vec![]),
            Provenance::new(ProvenanceSource::Remote),
        )
    }

    fn eval(op: Operator, property: Option<ConfigValue>, to_match: impl Into<ConfigValue>) -> bool {
        op.eval(property.as_ref(), Some(&to_match.into()), &element())
    }

    fn some(v: impl Into<ConfigValue>) -> Option<ConfigValue> {
        Some(v.into())
    }

    #[test]
    fn is_one_of() {
        let list = || vec!["alice", "bob"];
        assert!(eval(Operator::PropIsOneOf, some("alice"), list()));
        assert!(!eval(Operator::PropIsOneOf, some("charlie"), list()));
        assert!(!eval(Operator::PropIsOneOf, None, list()));
        assert!(!eval(Operator::PropIsOneOf, some(""), list()));
    }

    #[test]
    fn is_not_one_of() {
        let list = || vec!["alice", "bob"];
        assert!(!eval(Operator::PropIsNotOneOf, some("alice"), list()));
        assert!(eval(Operator::PropIsNotOneOf, some("charlie"), list()));
        // absent or empty property is "not one of"
        assert!(eval(Operator::PropIsNotOneOf, None, list()));
        assert!(eval(Operator::PropIsNotOneOf, some(Vec::<String>::new()), list()));
    }

    #[test]
    fn is_one_of_coerces_scalars_and_lists() {
        assert!(eval(Operator::PropIsOneOf, some(42i64), vec!["42"]));
        assert!(eval(Operator::PropIsOneOf, some(true), vec!["true"]));
        assert!(eval(Operator::PropIsOneOf, some(vec!["x", "bob"]), vec!["alice", "bob"]));
        assert!(!eval(Operator::PropIsOneOf, some(vec!["x", "y"]), vec!["alice", "bob"]));
    }

    #[test]
    fn list_operators_fail_closed_on_scalar_match_value() {
        assert!(!eval(Operator::PropIsOneOf, some("alice"), "alice"));
        assert!(!eval(Operator::PropIsNotOneOf, some("alice"), "bob"));
        assert!(!eval(Operator::PropEndsWithOneOf, some("alice"), "ice"));
    }

    #[test]
    fn string_predicates() {
        let email = || some("alice@example.com");
        assert!(eval(Operator::PropEndsWithOneOf, email(), vec!["@other.com", "@example.com"]));
        assert!(!eval(Operator::PropDoesNotEndWithOneOf, email(), vec!["@example.com"]));
        assert!(eval(Operator::PropStartsWithOneOf, email(), vec!["ali"]));
        assert!(eval(Operator::PropDoesNotStartWithOneOf, email(), vec!["bob"]));
        assert!(eval(Operator::PropContainsOneOf, email(), vec!["@ex"]));
        assert!(!eval(Operator::PropDoesNotContainOneOf, email(), vec!["@ex"]));
    }

    #[test]
    fn string_predicates_on_absent_or_non_string_property() {
        for property in [None, some(5i64)] {
            assert!(!eval(Operator::PropEndsWithOneOf, property.clone(), vec!["x"]));
            assert!(!eval(Operator::PropStartsWithOneOf, property.clone(), vec!["x"]));
            assert!(!eval(Operator::PropContainsOneOf, property.clone(), vec!["x"]));
            assert!(eval(Operator::PropDoesNotEndWithOneOf, property.clone(), vec!["x"]));
            assert!(eval(Operator::PropDoesNotStartWithOneOf, property.clone(), vec!["x"]));
            assert!(eval(Operator::PropDoesNotContainOneOf, property, vec!["x"]));
        }
    }

    #[test]
    fn hierarchical_match() {
        assert!(eval(Operator::HierarchicalMatch, some("a.b.c"), "a.b"));
        assert!(!eval(Operator::HierarchicalMatch, some("a.b"), "a.b.c"));
        assert!(eval(Operator::HierarchicalMatch, some("a.b"), "a.b"));
        assert!(!eval(Operator::HierarchicalMatch, None, "a.b"));
        assert!(!eval(Operator::HierarchicalMatch, some(1i64), "a.b"));
    }

    #[test]
    fn in_int_range() {
        let range = IntRange {
            start: Some(10),
            end: Some(20),
        };
        assert!(eval(Operator::InIntRange, some(10i64), range));
        assert!(!eval(Operator::InIntRange, some(20i64), range));
        assert!(!eval(Operator::InIntRange, some(15.0), range));
        assert!(!eval(Operator::InIntRange, None, range));
        assert!(eval(Operator::InIntRange, some(i64::MIN), IntRange { start: None, end: Some(0) }));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(eval(Operator::PropGreaterThan, some(19i64), 18i64));
        assert!(!eval(Operator::PropGreaterThan, some(18i64), 18i64));
        assert!(eval(Operator::PropGreaterThanOrEqual, some(18i64), 18.0));
        assert!(eval(Operator::PropLessThan, some(17.5), 18i64));
        assert!(!eval(Operator::PropLessThan, some(18i64), 18i64));
        assert!(eval(Operator::PropLessThanOrEqual, some(18.0), 18.0));
        assert!(!eval(Operator::PropGreaterThan, None, 1i64));
        assert!(!eval(Operator::PropGreaterThan, some("19"), 18i64));
        assert!(!eval(Operator::PropLessThan, some(f64::NAN), 18i64));
    }

    #[test]
    fn large_integers_compare_exactly() {
        // 2^53 + 1 is not representable as a double and would compare equal to 2^53 as f64.
        let big = 9_007_199_254_740_993i64;
        assert!(eval(Operator::PropGreaterThan, some(big), big - 1));
        assert!(!eval(Operator::PropLessThanOrEqual, some(big), big - 1));
    }

    #[test]
    fn regex_matching() {
        assert!(eval(Operator::PropMatches, some("test@example.com"), "^test.*"));
        assert!(!eval(Operator::PropMatches, some("example@test.com"), "^test.*"));
        assert!(eval(Operator::PropDoesNotMatch, some("example@test.com"), "^test.*"));
        assert!(!eval(Operator::PropDoesNotMatch, None, "^test.*"));
        assert!(!eval(Operator::PropMatches, some("x"), "(unclosed"));
    }

    #[test]
    fn semver_comparisons() {
        assert!(eval(Operator::PropSemverGreaterThan, some("1.13.0"), "1.5.0"));
        assert!(!eval(Operator::PropSemverGreaterThan, some("1.2.0"), "1.10.0"));
        assert!(eval(Operator::PropSemverLessThan, some("0.9.9"), "1.0.0"));
        assert!(eval(Operator::PropSemverEqual, some("1.0.0"), "1.0.0"));
        assert!(!eval(Operator::PropSemverEqual, some("not-a-version"), "1.0.0"));
    }

    #[test]
    fn time_comparisons() {
        assert!(eval(Operator::PropBefore, some(1_000i64), 2_000i64));
        assert!(!eval(Operator::PropBefore, some(2_000i64), 2_000i64));
        assert!(eval(Operator::PropAfter, some("2024-06-01T00:00:00Z"), "2024-01-01T00:00:00Z"));
        assert!(eval(Operator::PropAfter, some(1_717_200_000_000i64), "2024-01-01T00:00:00Z"));
        assert!(!eval(Operator::PropAfter, some("yesterday"), "2024-01-01T00:00:00Z"));
    }

    #[test]
    fn unknown_operator_never_matches() {
        assert!(!eval(Operator::Unknown, some("x"), "x"));
    }
}
