//! Detecting which keys changed value between two snapshots.
use std::collections::BTreeSet;

use crate::{ConfigValue, Evaluator, LookupContext, Snapshot};

/// A key whose value under the default context changed with a snapshot swap.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChangeEvent {
    /// Changed key.
    pub key: String,
    /// Value before the swap. `None` if the key was added.
    pub old_value: Option<ConfigValue>,
    /// Value after the swap. `None` if the key was removed.
    pub new_value: Option<ConfigValue>,
}

/// Receives change events after each snapshot swap.
///
/// Called synchronously on the thread that applied the update, in registration order.
pub trait ConfigChangeListener {
    /// Handle the events of one swap. Never called with an empty list.
    fn on_change(&self, events: &[ConfigChangeEvent]);
}

impl<T: Fn(&[ConfigChangeEvent])> ConfigChangeListener for T {
    fn on_change(&self, events: &[ConfigChangeEvent]) {
        self(events)
    }
}

/// Compares snapshots key by key.
///
/// Values are compared as configured: weighted distributions are compared as a whole rather than
/// by a drawn variant, and indirect references are not resolved. This makes the diff a pure
/// function of the two snapshots.
pub struct ChangeDetector {
    evaluator: Evaluator,
    namespace: Option<String>,
}

impl ChangeDetector {
    /// Create a detector evaluating under `namespace`.
    pub fn new(namespace: Option<&str>) -> Self {
        ChangeDetector {
            evaluator: Evaluator::default(),
            namespace: namespace.map(str::to_owned),
        }
    }

    /// Events for every key added, removed or resolving differently in `new` than in `old`,
    /// ordered by key.
    pub fn diff(&self, old: &Snapshot, new: &Snapshot) -> Vec<ConfigChangeEvent> {
        let old_context = self.default_context(old);
        let new_context = self.default_context(new);

        let keys: BTreeSet<&str> = old.keys().chain(new.keys()).collect();
        keys.into_iter()
            .filter_map(|key| {
                let old_value = self.value(old, key, &old_context);
                let new_value = self.value(new, key, &new_context);
                (old_value != new_value).then(|| ConfigChangeEvent {
                    key: key.to_owned(),
                    old_value,
                    new_value,
                })
            })
            .collect()
    }

    fn default_context(&self, snapshot: &Snapshot) -> LookupContext {
        LookupContext::new(self.namespace.as_deref(), snapshot.default_context().clone())
    }

    fn value(&self, snapshot: &Snapshot, key: &str, context: &LookupContext) -> Option<ConfigValue> {
        self.evaluator
            .evaluate_unselected(snapshot, key, context)
            .ok()
            .map(|m| m.value)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;
    use crate::{
        ConditionalValue, Config, ConfigElement, ConfigRow, ConfigType, Context, ContextSet,
        Criterion, Operator, Provenance, ProvenanceSource, WeightedValues,
    };

    fn config(key: &str, value: impl Into<ConfigValue>) -> Config {
        Config::new(
            key,
            1,
            ConfigType::Config,
            vec![ConfigRow::new(None, vec![ConditionalValue::always(value)])],
        )
    }

    fn snapshot(configs: Vec<Config>, default_context: ContextSet) -> Snapshot {
        let elements = configs
            .into_iter()
            .map(|config| {
                let element = ConfigElement::new(config, Provenance::new(ProvenanceSource::Remote));
                (element.key().to_owned(), Arc::new(element))
            })
            .collect::<HashMap<_, _>>();
        Snapshot::new(elements, None, default_context)
    }

    #[test]
    fn reports_added_removed_and_changed_keys() {
        let old = snapshot(
            vec![config("kept", "same"), config("changed", 1i64), config("removed", true)],
            ContextSet::new(),
        );
        let new = snapshot(
            vec![config("kept", "same"), config("changed", 2i64), config("added", "new")],
            ContextSet::new(),
        );

        let events = ChangeDetector::new(None).diff(&old, &new);
        assert_eq!(
            events,
            vec![
                ConfigChangeEvent {
                    key: "added".to_owned(),
                    old_value: None,
                    new_value: Some("new".into()),
                },
                ConfigChangeEvent {
                    key: "changed".to_owned(),
                    old_value: Some(1i64.into()),
                    new_value: Some(2i64.into()),
                },
                ConfigChangeEvent {
                    key: "removed".to_owned(),
                    old_value: Some(true.into()),
                    new_value: None,
                },
            ]
        );
    }

    #[test]
    fn diff_is_idempotent() {
        let old = snapshot(vec![config("a", "x")], ContextSet::new());
        let new = snapshot(vec![config("a", "y"), config("b", "z")], ContextSet::new());
        let detector = ChangeDetector::new(None);
        assert_eq!(detector.diff(&old, &new), detector.diff(&old, &new));
    }

    #[test]
    fn identical_snapshots_produce_no_events() {
        let rollout = WeightedValues::new([(true, 1), (false, 1)], None);
        let configs = || vec![config("a", "x"), config("rollout", rollout.clone())];
        let old = snapshot(configs(), ContextSet::new());
        let new = snapshot(configs(), ContextSet::new());
        assert!(ChangeDetector::new(None).diff(&old, &new).is_empty());
    }

    #[test]
    fn evaluates_under_default_context_and_namespace() {
        let targeted = Config::new(
            "targeted",
            1,
            ConfigType::Config,
            vec![ConfigRow::new(
                None,
                vec![
                    ConditionalValue::new(
                        vec![
                            Criterion::new("user.plan", Operator::PropIsOneOf, vec!["pro"]),
                            Criterion::new("NAMESPACE", Operator::HierarchicalMatch, "billing"),
                        ],
                        "pro",
                    ),
                    ConditionalValue::always("free"),
                ],
            )],
        );

        let old = snapshot(vec![targeted.clone()], ContextSet::new());
        let new = snapshot(
            vec![targeted],
            ContextSet::from(Context::new("user").with("plan", "pro")),
        );

        let events = ChangeDetector::new(Some("billing.invoices")).diff(&old, &new);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_value, Some("free".into()));
        assert_eq!(events[0].new_value, Some("pro".into()));

        assert!(ChangeDetector::new(Some("search")).diff(&old, &new).is_empty());
    }
}
