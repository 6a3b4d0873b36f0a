//! A thread-safe in-memory holder for the currently active snapshot. [`SnapshotStore`] provides
//! wait-free access for readers (evaluation) and atomic replacement for the single writer.
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use arc_swap::ArcSwap;

use crate::{ConfigElement, ContextSet, LookupContext};

/// One generation of configuration: every element keyed by config key, the active environment
/// and the server-supplied default context.
///
/// A `Snapshot` is never modified once published; updates build a new one.
#[derive(Debug, Default)]
pub struct Snapshot {
    elements: HashMap<String, Arc<ConfigElement>>,
    environment_id: Option<i64>,
    default_context: ContextSet,
    base_lookup: OnceLock<LookupContext>,
}

impl Snapshot {
    /// Create a snapshot.
    pub fn new(
        elements: HashMap<String, Arc<ConfigElement>>,
        environment_id: Option<i64>,
        default_context: ContextSet,
    ) -> Self {
        Snapshot {
            elements,
            environment_id,
            default_context,
            base_lookup: OnceLock::new(),
        }
    }

    /// Get the element for `key`.
    pub fn get(&self, key: &str) -> Option<&Arc<ConfigElement>> {
        self.elements.get(key)
    }

    /// Return `true` if the snapshot has an element for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.elements.contains_key(key)
    }

    /// All keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// All elements in unspecified order.
    pub fn elements(&self) -> impl Iterator<Item = &Arc<ConfigElement>> {
        self.elements.values()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Return `true` if the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Environment whose rows take precedence over default rows.
    pub fn environment_id(&self) -> Option<i64> {
        self.environment_id
    }

    /// Context properties the server supplies as defaults for every evaluation.
    pub fn default_context(&self) -> &ContextSet {
        &self.default_context
    }

    /// Lookup context used when a read brings no context of its own. Built by `init` on first use
    /// and shared by every later read of this snapshot.
    pub(crate) fn base_lookup(&self, init: impl FnOnce() -> LookupContext) -> &LookupContext {
        self.base_lookup.get_or_init(init)
    }
}

/// `SnapshotStore` holds the active [`Snapshot`] behind a single atomically swappable reference.
///
/// Readers load the reference once per operation and evaluate entirely against it, so a
/// concurrent [`replace`](SnapshotStore::replace) can never produce a read mixing two generations.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    /// Create a store holding an empty snapshot.
    pub fn new() -> Self {
        SnapshotStore::default()
    }

    /// Get the currently active snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Get the element for `key` from the active snapshot.
    pub fn get(&self, key: &str) -> Option<Arc<ConfigElement>> {
        self.current.load().get(key).cloned()
    }

    /// Return `true` if the active snapshot has an element for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.current.load().contains_key(key)
    }

    /// Keys of the active snapshot.
    pub fn keys(&self) -> Vec<String> {
        self.current.load().keys().map(str::to_owned).collect()
    }

    /// Elements of the active snapshot.
    pub fn all_elements(&self) -> Vec<Arc<ConfigElement>> {
        self.current.load().elements().cloned().collect()
    }

    /// Publish a new snapshot, returning the previous one.
    pub fn replace(&self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        self.current.swap(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::{Snapshot, SnapshotStore};
    use crate::{
        Config, ConfigElement, ConfigRow, ConfigType, ConditionalValue, Context, ContextSet,
        LookupContext, Provenance, ProvenanceSource,
    };

    fn snapshot_with(key: &str, id: i64) -> Snapshot {
        let config = Config::new(
            key,
            id,
            ConfigType::Config,
            vec![ConfigRow::new(None, vec![ConditionalValue::always(id)])],
        );
        let element = ConfigElement::new(config, Provenance::new(ProvenanceSource::Remote));
        Snapshot::new(
            HashMap::from([(key.to_owned(), Arc::new(element))]),
            Some(1),
            ContextSet::new(),
        )
    }

    #[test]
    fn starts_empty() {
        let store = SnapshotStore::new();
        assert!(store.snapshot().is_empty());
        assert!(store.get("missing").is_none());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn base_lookup_is_built_once() {
        let snapshot = snapshot_with("a", 1);
        let builds = std::cell::Cell::new(0);
        let build = || {
            builds.set(builds.get() + 1);
            LookupContext::new(
                Some("billing"),
                ContextSet::from(Context::new("user").with("key", "u-1")),
            )
        };

        let first = snapshot.base_lookup(build);
        assert_eq!(first.namespace(), Some("billing"));
        let second = snapshot.base_lookup(|| unreachable!());
        assert!(std::ptr::eq(first, second));
        assert_eq!(builds.get(), 1);
    }

    #[test]
    fn can_replace_snapshot_from_another_thread() {
        let store = Arc::new(SnapshotStore::new());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.replace(Arc::new(snapshot_with("a", 1)));
            })
            .join();
        }

        assert!(store.contains_key("a"));
        assert_eq!(store.keys(), vec!["a".to_owned()]);
        assert_eq!(store.all_elements().len(), 1);
    }

    #[test]
    fn readers_keep_their_generation_across_replace() {
        let store = SnapshotStore::new();
        store.replace(Arc::new(snapshot_with("a", 1)));

        let held = store.snapshot();
        let previous = store.replace(Arc::new(snapshot_with("b", 2)));

        assert!(Arc::ptr_eq(&held, &previous));
        assert!(held.contains_key("a"));
        assert!(!held.contains_key("b"));
        assert!(store.contains_key("b"));
        assert!(!store.contains_key("a"));
    }

    #[test]
    fn concurrent_readers_see_whole_generations() {
        let store = Arc::new(SnapshotStore::new());
        store.replace(Arc::new(snapshot_with("k", 0)));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let snapshot = store.snapshot();
                        let element = snapshot.get("k").expect("key present in every generation");
                        let id = element.config().id;
                        let value = &element.config().rows[0].values[0].value.value;
                        assert_eq!(value.as_int(), Some(id));
                    }
                })
            })
            .collect();

        for id in 1..200 {
            store.replace(Arc::new(snapshot_with("k", id)));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
