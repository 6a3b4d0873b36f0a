//! Rule evaluation: from a snapshot, a key and a context to a [`Match`].
mod evaluator;
mod matched;
mod operators;

pub use evaluator::{Evaluator, MAX_SEGMENT_DEPTH};
pub use matched::{EvaluatedCriterion, Match};
