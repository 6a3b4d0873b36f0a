//! Evaluation input: named groups of properties supplied by the caller.
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use serde::{Deserialize, Serialize};

use crate::ConfigValue;

/// Flattened key holding the client's namespace.
pub const NAMESPACE_KEY: &str = "NAMESPACE";

/// Synthetic key resolving to the current time in epoch milliseconds.
pub const CURRENT_TIME_KEY: &str = "prefab.current-time";

/// A named group of properties, e.g. `user` or `device`.
///
/// A context with an empty name contributes unprefixed keys when flattened.
///
/// # Examples
/// ```
/// # use prefab::Context;
/// let user = Context::new("user")
///     .with("key", "u-123")
///     .with("plan", "pro");
/// assert_eq!(user.get("plan"), Some(&"pro".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Group name.
    pub name: String,
    /// Properties of the group.
    pub properties: HashMap<String, ConfigValue>,
}

impl Context {
    /// Create an empty context with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Context {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    /// Add a property, replacing any previous value.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    /// Get a property.
    pub fn get(&self, property: &str) -> Option<&ConfigValue> {
        self.properties.get(property)
    }
}

/// A set of contexts, at most one per name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet {
    contexts: HashMap<String, Context>,
}

impl ContextSet {
    /// Create an empty set.
    pub fn new() -> Self {
        ContextSet::default()
    }

    /// Add a context, replacing any context with the same name.
    pub fn with(mut self, context: Context) -> Self {
        self.insert(context);
        self
    }

    /// Insert a context, returning the one it replaced.
    pub fn insert(&mut self, context: Context) -> Option<Context> {
        self.contexts.insert(context.name.clone(), context)
    }

    /// Get a context by name.
    pub fn get(&self, name: &str) -> Option<&Context> {
        self.contexts.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Context> {
        self.contexts.get_mut(name)
    }

    /// Iterate over contexts in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    /// Number of contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Return `true` if the set holds no contexts.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl FromIterator<Context> for ContextSet {
    fn from_iter<T: IntoIterator<Item = Context>>(iter: T) -> Self {
        iter.into_iter().fold(ContextSet::default(), |acc, context| acc.with(context))
    }
}

impl From<Context> for ContextSet {
    fn from(value: Context) -> Self {
        ContextSet::new().with(value)
    }
}

/// Immutable evaluation input: a context set plus the client namespace, flattened on demand into
/// `"<context>.<property>"` keys.
///
/// The flattened view is computed once per instance.
#[derive(Debug, Clone, Default)]
pub struct LookupContext {
    namespace: Option<String>,
    contexts: Arc<ContextSet>,
    flattened: OnceLock<HashMap<String, ConfigValue>>,
}

impl LookupContext {
    /// Create a lookup context.
    pub fn new(namespace: Option<&str>, contexts: impl Into<Arc<ContextSet>>) -> Self {
        LookupContext {
            namespace: namespace.map(str::to_owned),
            contexts: contexts.into(),
            flattened: OnceLock::new(),
        }
    }

    /// An empty context.
    pub fn empty() -> Self {
        LookupContext::default()
    }

    /// The contexts this lookup was built from.
    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    /// The client namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Look up a flattened property, e.g. `"user.key"`.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.flattened().get(key)
    }

    /// The flattened property map.
    pub fn flattened(&self) -> &HashMap<String, ConfigValue> {
        self.flattened.get_or_init(|| {
            let mut map = HashMap::new();
            for context in self.contexts.iter() {
                for (property, value) in &context.properties {
                    let key = if context.name.is_empty() {
                        property.clone()
                    } else {
                        format!("{}.{}", context.name, property)
                    };
                    map.insert(key, value.clone());
                }
            }
            if let Some(namespace) = &self.namespace {
                map.insert(NAMESPACE_KEY.to_owned(), namespace.as_str().into());
            }
            map
        })
    }
}
