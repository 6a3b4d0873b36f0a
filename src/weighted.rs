//! Selection of one variant from a weighted distribution.
use rand::Rng;

use crate::{
    sharder::{Murmur3Sharder, Sharder},
    ConfigValue, LookupContext, WeightedValues,
};

/// Source of uniformly distributed draws in `[0, 1)`, used when no stable identity is available.
pub trait RandomSource {
    /// Draw a value in `[0, 1)`.
    fn next_fraction(&self) -> f64;
}

/// Draws from the thread-local RNG.
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Picks variants from [`WeightedValues`].
pub struct WeightedValueEvaluator<S = Murmur3Sharder, R = ThreadRandom> {
    sharder: S,
    random: R,
}

impl Default for WeightedValueEvaluator {
    fn default() -> Self {
        WeightedValueEvaluator {
            sharder: Murmur3Sharder,
            random: ThreadRandom,
        }
    }
}

impl<S: Sharder, R: RandomSource> WeightedValueEvaluator<S, R> {
    /// Create an evaluator with explicit hashing and randomness.
    pub fn new(sharder: S, random: R) -> Self {
        WeightedValueEvaluator { sharder, random }
    }

    /// Select a variant for `config_key` under `context`, returning the value and its index.
    ///
    /// When `hash_by_property_name` names a property present in the context, the selection is a
    /// pure function of the config key and that property's value. Otherwise it is random.
    /// Returns `None` only for an empty distribution.
    pub fn select<'a>(
        &self,
        weighted: &'a WeightedValues,
        config_key: &str,
        context: &LookupContext,
    ) -> Option<(&'a ConfigValue, usize)> {
        let fraction = self.fraction_for(weighted, config_key, context);
        let index = bucket(weighted, fraction)?;
        Some((&weighted.weighted_values[index].value, index))
    }

    fn fraction_for(&self, weighted: &WeightedValues, config_key: &str, context: &LookupContext) -> f64 {
        let identity = weighted
            .hash_by_property_name
            .as_deref()
            .and_then(|property| context.get(property))
            .and_then(|value| value.value.coerce_to_string());

        match identity {
            Some(identity) => {
                let mut input = Vec::with_capacity(config_key.len() + identity.len());
                input.extend_from_slice(config_key.as_bytes());
                input.extend_from_slice(identity.as_bytes());
                self.sharder.fraction(&input)
            }
            None => self.random.next_fraction(),
        }
    }
}

/// Index of the first variant whose cumulative weight fraction reaches `fraction`. Falls back to
/// the first variant when weights sum to zero or rounding leaves the draw unassigned.
fn bucket(weighted: &WeightedValues, fraction: f64) -> Option<usize> {
    if weighted.weighted_values.is_empty() {
        return None;
    }

    let total: u64 = weighted
        .weighted_values
        .iter()
        .map(|variant| u64::from(variant.weight))
        .sum();
    if total == 0 {
        return Some(0);
    }

    let mut running = 0u64;
    let index = weighted.weighted_values.iter().position(|variant| {
        running += u64::from(variant.weight);
        running as f64 / total as f64 >= fraction
    });
    Some(index.unwrap_or(0))
}
