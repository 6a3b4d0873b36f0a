use std::{borrow::Cow, cell::OnceCell, collections::HashMap, sync::Arc};

use chrono::Utc;

use crate::{
    context::CURRENT_TIME_KEY,
    sharder::{Murmur3Sharder, Sharder},
    weighted::{RandomSource, ThreadRandom, WeightedValueEvaluator},
    ConfigElement, ConfigRow, ConfigValue, Criterion, EvaluationError, LookupContext, Operator,
    Snapshot, Value,
};

use super::{EvaluatedCriterion, Match};

/// Segments may reference other segments; nesting deeper than this fails closed.
pub const MAX_SEGMENT_DEPTH: usize = 16;

/// Walks a config's rows against a [`LookupContext`] and produces a [`Match`].
///
/// Evaluation is a pure function of the snapshot and the context (plus the random draw for
/// weighted values without a stable identity), so one evaluator can serve any number of
/// threads.
pub struct Evaluator<S = Murmur3Sharder, R = ThreadRandom> {
    weighted: WeightedValueEvaluator<S, R>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator {
            weighted: WeightedValueEvaluator::default(),
        }
    }
}

/// Whether weighted distributions are resolved to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Resolve,
    /// Keep the distribution itself as the value. Used where results must be reproducible
    /// regardless of random draws (change detection).
    Keep,
}

impl<S: Sharder, R: RandomSource> Evaluator<S, R> {
    /// Create an evaluator with a custom weighted-value evaluator.
    pub fn new(weighted: WeightedValueEvaluator<S, R>) -> Self {
        Evaluator { weighted }
    }

    /// Evaluate `key` against `context`. Returns `None` if the key is absent or nothing matches.
    pub fn evaluate(&self, snapshot: &Snapshot, key: &str, context: &LookupContext) -> Option<Match> {
        match self.try_evaluate(snapshot, key, context) {
            Ok(m) => {
                log::trace!(target: "prefab",
                            key,
                            value:display = m.value.redacted(),
                            row_index = m.row_index,
                            conditional_value_index = m.conditional_value_index;
                            "evaluated config");
                Some(m)
            }
            Err(err) if err.is_normal() => {
                log::trace!(target: "prefab", key; "no value: {err}");
                None
            }
            Err(err) => {
                log::debug!(target: "prefab", key; "evaluation failed: {err}");
                None
            }
        }
    }

    /// Evaluate `key` against `context`, reporting why nothing was produced.
    pub fn try_evaluate(
        &self,
        snapshot: &Snapshot,
        key: &str,
        context: &LookupContext,
    ) -> Result<Match, EvaluationError> {
        Evaluation::new(self, snapshot, context, Selection::Resolve)
            .eval_key(key, &mut Scope::default())
    }

    /// Like [`try_evaluate`](Self::try_evaluate) but leaves weighted distributions unresolved.
    pub(crate) fn evaluate_unselected(
        &self,
        snapshot: &Snapshot,
        key: &str,
        context: &LookupContext,
    ) -> Result<Match, EvaluationError> {
        Evaluation::new(self, snapshot, context, Selection::Keep)
            .eval_key(key, &mut Scope::default())
    }
}

/// Dynamic state threaded through one evaluation, including nested segment evaluations.
#[derive(Default)]
struct Scope<'a> {
    /// Row-scoped properties, most recently entered row last.
    frames: Vec<&'a HashMap<String, ConfigValue>>,
    /// Keys of the configs being evaluated, outermost first.
    keys: Vec<&'a str>,
}

impl<'a> Scope<'a> {
    fn property(&self, name: &str) -> Option<&'a ConfigValue> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn is_evaluating(&self, key: &str) -> bool {
        self.keys.iter().any(|k| *k == key)
    }
}

/// State of one top-level evaluation.
struct Evaluation<'a, S, R> {
    evaluator: &'a Evaluator<S, R>,
    snapshot: &'a Snapshot,
    context: &'a LookupContext,
    selection: Selection,
    now_millis: OnceCell<i64>,
}

impl<'a, S: Sharder, R: RandomSource> Evaluation<'a, S, R> {
    fn new(
        evaluator: &'a Evaluator<S, R>,
        snapshot: &'a Snapshot,
        context: &'a LookupContext,
        selection: Selection,
    ) -> Self {
        Evaluation {
            evaluator,
            snapshot,
            context,
            selection,
            now_millis: OnceCell::new(),
        }
    }

    fn eval_key(&self, key: &str, scope: &mut Scope<'a>) -> Result<Match, EvaluationError> {
        if scope.keys.len() > MAX_SEGMENT_DEPTH {
            return Err(EvaluationError::SegmentDepthExceeded);
        }

        let element: &'a Arc<ConfigElement> = self
            .snapshot
            .get(key)
            .ok_or(EvaluationError::KeyNotFound)?;

        scope.keys.push(element.key());
        let result = self.eval_rows(element, scope);
        scope.keys.pop();
        result
    }

    fn eval_rows(
        &self,
        element: &'a Arc<ConfigElement>,
        scope: &mut Scope<'a>,
    ) -> Result<Match, EvaluationError> {
        let rows = &element.config().rows;

        for &row_index in element.row_order(self.snapshot.environment_id()).iter() {
            let row = &rows[row_index];

            let scoped = !row.properties.is_empty();
            if scoped {
                scope.frames.push(&row.properties);
            }
            let found = self.eval_row(element, row, scope);
            if scoped {
                scope.frames.pop();
            }

            if let Some((conditional_value_index, evaluated_criteria)) = found? {
                return self.build_match(
                    element,
                    row_index,
                    conditional_value_index,
                    evaluated_criteria,
                );
            }
        }

        Err(EvaluationError::NoMatch)
    }

    /// Index and criteria record of the first conditional value in `row` whose criteria all
    /// match.
    fn eval_row(
        &self,
        element: &'a ConfigElement,
        row: &'a ConfigRow,
        scope: &mut Scope<'a>,
    ) -> Result<Option<(usize, Vec<EvaluatedCriterion>)>, EvaluationError> {
        'values: for (index, conditional_value) in row.values.iter().enumerate() {
            let mut evaluated = Vec::with_capacity(conditional_value.criteria.len());
            for (criterion_index, criterion) in conditional_value.criteria.iter().enumerate() {
                let result = self.eval_criterion(element, criterion_index, criterion, scope)?;
                let matched = result.matched;
                evaluated.push(result);
                if !matched {
                    continue 'values;
                }
            }
            return Ok(Some((index, evaluated)));
        }
        Ok(None)
    }

    /// Evaluate one criterion. Fails only when a segment cannot be decided and the criterion
    /// belongs to a segment itself, so that the undecided state reaches the outermost config.
    fn eval_criterion(
        &self,
        element: &'a ConfigElement,
        criterion_index: usize,
        criterion: &'a Criterion,
        scope: &mut Scope<'a>,
    ) -> Result<EvaluatedCriterion, EvaluationError> {
        let to_match = criterion.value_to_match.as_ref();

        let (property, matched) = match criterion.operator {
            Operator::InSeg | Operator::NotInSeg => {
                let matched = match self.segment_membership(element, to_match, scope) {
                    Ok(Some(is_member)) => is_member == (criterion.operator == Operator::InSeg),
                    Ok(None) => false,
                    Err(err) if scope.keys.len() > 1 => return Err(err),
                    Err(err) => {
                        log::debug!(target: "prefab",
                                    key = element.key(),
                                    segment:? = to_match.map(|v| &v.value);
                                    "unable to evaluate segment, criterion does not match: {err}");
                        false
                    }
                };
                (None, matched)
            }
            Operator::Unknown => {
                log::debug!(target: "prefab",
                            key = element.key(),
                            criterion:serde = criterion;
                            "unsupported operator, criterion does not match");
                (None, false)
            }
            operator => {
                let property = self.lookup(scope, &criterion.property_name);
                let matched = operator.eval(property.as_deref(), to_match, element);
                (property.map(Cow::into_owned), matched)
            }
        };

        Ok(EvaluatedCriterion {
            index: criterion_index,
            evaluated_property: property,
            matched,
        })
    }

    /// Whether the context belongs to the segment named by `to_match`. `Ok(None)` means the
    /// criterion is malformed; errors mean the segment cannot be decided.
    fn segment_membership(
        &self,
        element: &ConfigElement,
        to_match: Option<&ConfigValue>,
        scope: &mut Scope<'a>,
    ) -> Result<Option<bool>, EvaluationError> {
        let Some(Value::String(segment_key)) = to_match.map(|v| &v.value) else {
            log::debug!(target: "prefab", key = element.key(); "segment criterion without segment key");
            return Ok(None);
        };

        if scope.is_evaluating(segment_key) {
            return Err(EvaluationError::SegmentCycle);
        }

        match self.eval_key(segment_key, scope) {
            Ok(m) => Ok(Some(m.value.value == Value::Bool(true))),
            Err(EvaluationError::KeyNotFound) | Err(EvaluationError::NoMatch) => Ok(Some(false)),
            Err(err) => Err(err),
        }
    }

    /// Resolve a criterion property: row-scoped properties first, then the context, then
    /// synthetic keys.
    fn lookup(&self, scope: &Scope<'a>, name: &str) -> Option<Cow<'a, ConfigValue>> {
        if let Some(value) = scope.property(name) {
            return Some(Cow::Borrowed(value));
        }
        if let Some(value) = self.context.get(name) {
            return Some(Cow::Borrowed(value));
        }
        if name == CURRENT_TIME_KEY {
            let now = *self
                .now_millis
                .get_or_init(|| Utc::now().timestamp_millis());
            return Some(Cow::Owned(ConfigValue::new(now)));
        }
        None
    }

    fn build_match(
        &self,
        element: &'a Arc<ConfigElement>,
        row_index: usize,
        conditional_value_index: usize,
        evaluated_criteria: Vec<EvaluatedCriterion>,
    ) -> Result<Match, EvaluationError> {
        let raw = &element.config().rows[row_index].values[conditional_value_index].value;

        let (value, weighted_value_index) = match (&raw.value, self.selection) {
            (Value::WeightedValues(weighted), Selection::Resolve) => {
                let (value, index) = self
                    .evaluator
                    .weighted
                    .select(weighted, element.key(), self.context)
                    .ok_or_else(|| {
                        log::debug!(target: "prefab", key = element.key(); "empty weighted value");
                        EvaluationError::NoMatch
                    })?;
                (value.clone(), Some(index))
            }
            _ => (raw.clone(), None),
        };

        Ok(Match {
            value,
            element: element.clone(),
            evaluated_criteria,
            row_index,
            conditional_value_index,
            weighted_value_index,
        })
    }
}
