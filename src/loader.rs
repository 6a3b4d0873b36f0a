//! Layered config sources and the merged view built from them.
use std::{collections::HashMap, sync::Arc};

use crate::{Config, ConfigElement, Provenance};

/// Keeps the three config layers and merges them into snapshot payloads.
///
/// Layers, lowest precedence first:
/// 1. bundled defaults, loaded once at startup;
/// 2. server-delivered configs, updated incrementally by [`apply`](ConfigLoader::apply);
/// 3. local overrides, loaded once at startup.
///
/// `ConfigLoader` is not internally synchronized. [`apply`](ConfigLoader::apply) reads and
/// updates the highwater mark in several steps, so concurrent writers must be serialized by the
/// caller (the client keeps the loader behind a mutex).
#[derive(Debug, Default)]
pub struct ConfigLoader {
    defaults: HashMap<String, Arc<ConfigElement>>,
    server: HashMap<String, Arc<ConfigElement>>,
    overrides: HashMap<String, Arc<ConfigElement>>,
    highwater_mark: i64,
}

/// Outcome of [`ConfigLoader::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Config was stored.
    Stored,
    /// Config was a tombstone and its key was removed.
    Removed,
    /// An entry with a newer id already exists; the update was dropped.
    Stale,
}

impl ConfigLoader {
    /// Create a loader with the two static layers.
    pub fn new(
        defaults: impl IntoIterator<Item = ConfigElement>,
        overrides: impl IntoIterator<Item = ConfigElement>,
    ) -> Self {
        ConfigLoader {
            defaults: index(defaults),
            server: HashMap::new(),
            overrides: index(overrides),
            highwater_mark: 0,
        }
    }

    /// Accept a server-delivered config if no entry exists for its key or the existing entry's
    /// id is not newer. Configs without values remove their key.
    pub fn apply(&mut self, config: Config, provenance: Provenance) -> ApplyOutcome {
        let key = config.key.clone();
        let id = config.id;

        let outcome = match self.server.get(&key) {
            Some(existing) if existing.config().id > id => {
                log::debug!(target: "prefab",
                            key = key.as_str(),
                            id,
                            existing_id = existing.config().id;
                            "ignoring out-of-order config update");
                ApplyOutcome::Stale
            }
            _ if config.is_tombstone() => {
                self.server.remove(&key);
                ApplyOutcome::Removed
            }
            _ => {
                if let Err(err) = config.validate() {
                    log::warn!(target: "prefab", key = key.as_str(), id; "accepting config with invalid rules: {err}");
                }
                self.server
                    .insert(key, Arc::new(ConfigElement::new(config, provenance)));
                ApplyOutcome::Stored
            }
        };

        let current_max = self
            .server
            .values()
            .map(|element| element.config().id)
            .max()
            .unwrap_or(0);
        let accepted_id = if outcome == ApplyOutcome::Stale { 0 } else { id };
        self.highwater_mark = self.highwater_mark.max(current_max).max(accepted_id);

        outcome
    }

    /// Highest config id accepted from the server. Used to resume delivery after a reconnect.
    pub fn highwater_mark(&self) -> i64 {
        self.highwater_mark
    }

    /// Server-delivered element for `key`, if any.
    pub fn server_element(&self, key: &str) -> Option<&Arc<ConfigElement>> {
        self.server.get(key)
    }

    /// Merge all layers: defaults, then server configs, then local overrides. The last layer
    /// defining a key wins.
    pub fn calc_config(&self) -> HashMap<String, Arc<ConfigElement>> {
        let mut merged = HashMap::with_capacity(self.defaults.len() + self.server.len());
        for layer in [&self.defaults, &self.server, &self.overrides] {
            for (key, element) in layer {
                merged.insert(key.clone(), element.clone());
            }
        }
        merged
    }
}

fn index(elements: impl IntoIterator<Item = ConfigElement>) -> HashMap<String, Arc<ConfigElement>> {
    elements
        .into_iter()
        .map(|element| (element.key().to_owned(), Arc::new(element)))
        .collect()
}
