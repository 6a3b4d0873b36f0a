use std::sync::Arc;

use serde::Serialize;

use crate::{ConfigElement, ConfigValue, Criterion};

/// Outcome of evaluating one criterion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedCriterion {
    /// Position of the criterion within its conditional value. See [`Match::criterion`].
    pub index: usize,
    /// The property value the criterion saw, if any.
    pub evaluated_property: Option<ConfigValue>,
    /// Whether the criterion matched.
    pub matched: bool,
}

/// Full record of one resolution: the selected value and where in the config it came from.
///
/// Consumed by telemetry; `row_index` and `conditional_value_index` index into the config as
/// delivered, not into the environment-ordered view.
#[derive(Debug, Clone)]
pub struct Match {
    /// Selected value. Weighted distributions have already been resolved to one variant;
    /// indirect references have not.
    pub value: ConfigValue,
    /// Element the value was selected from.
    pub element: Arc<ConfigElement>,
    /// Criteria of the selected conditional value, in order.
    pub evaluated_criteria: Vec<EvaluatedCriterion>,
    /// Index of the matching row in the config.
    pub row_index: usize,
    /// Index of the matching conditional value within its row.
    pub conditional_value_index: usize,
    /// Index of the selected variant if the matching value was a weighted distribution.
    pub weighted_value_index: Option<usize>,
}

impl Match {
    /// Key of the config the value was selected from.
    pub fn key(&self) -> &str {
        self.element.key()
    }

    /// The criterion an entry of [`evaluated_criteria`](Self::evaluated_criteria) refers to.
    pub fn criterion(&self, evaluated: &EvaluatedCriterion) -> Option<&Criterion> {
        self.element
            .config()
            .rows
            .get(self.row_index)?
            .values
            .get(self.conditional_value_index)?
            .criteria
            .get(evaluated.index)
    }
}
