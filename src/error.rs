use crate::value::ValueType;

/// Represents a result type for operations in the Prefab client.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Prefab client.
///
/// Resolution itself never fails: missing keys and non-matching rules are reported as `None`.
/// These errors surface from validation, indirect-reference resolution and client startup.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Config violates one of the structural invariants of the rule model.
    #[error("invalid config {key:?}: {reason}")]
    InvalidConfig {
        /// Key of the offending config.
        key: String,
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// An indirect reference points at an environment variable that is not set.
    #[error("environment variable {name:?} is not set")]
    MissingEnvVar {
        /// Name of the environment variable.
        name: String,
    },

    /// An environment variable could not be coerced to the config's declared type.
    #[error("unable to parse environment variable {name:?} as {value_type:?}")]
    EnvVarParse {
        /// Name of the environment variable.
        name: String,
        /// Type the value was expected to have.
        value_type: ValueType,
    },

    /// First snapshot did not arrive within the configured timeout.
    #[error("timed out waiting for the first configuration snapshot")]
    InitializationTimeout,
}

/// Reasons an evaluation produced no value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// No config exists for the requested key.
    #[error("config not found")]
    KeyNotFound,

    /// Config exists but no row for the active environment has a matching conditional value.
    #[error("no matching conditional value")]
    NoMatch,

    /// Segment references nest deeper than the evaluator allows.
    #[error("segment nesting too deep")]
    SegmentDepthExceeded,

    /// A segment references itself, directly or through other segments.
    #[error("segment references itself")]
    SegmentCycle,
}

impl EvaluationError {
    /// Return `true` if the error is a normal running condition and the caller should fall back
    /// to its default silently.
    pub fn is_normal(self) -> bool {
        match self {
            EvaluationError::KeyNotFound | EvaluationError::NoMatch => true,
            EvaluationError::SegmentDepthExceeded | EvaluationError::SegmentCycle => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EvaluationError;

    #[test]
    fn only_missing_and_unmatched_keys_are_normal() {
        assert!(EvaluationError::KeyNotFound.is_normal());
        assert!(EvaluationError::NoMatch.is_normal());
        assert!(!EvaluationError::SegmentDepthExceeded.is_normal());
        assert!(!EvaluationError::SegmentCycle.is_normal());
    }
}
