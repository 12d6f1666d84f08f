//! Errors in the library.
use std::path::PathBuf;
use thiserror::Error;

/// Errors in the library.
///
/// None of these are retried. They indicate a programming or configuration
/// error, and continuing would corrupt the learning signal.
#[derive(Error, Debug)]
pub enum StrideError {
    /// Batch size disagreement between the environment pool and a policy/value call.
    #[error("shape mismatch in {component}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Name of the component that detected the mismatch.
        component: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Advantage estimation was invoked before value predictions were populated.
    #[error("value predictions are missing from the trajectory")]
    MissingValuePrediction,

    /// Old and new log-probabilities were computed from different batches.
    #[error("log-prob batches are desynchronized: {0}")]
    BatchAlignmentError(String),

    /// Staging or replacing a checkpoint failed.
    #[error("checkpoint I/O error at {path:?}: {source}")]
    CheckpointIoError {
        /// Path being written or renamed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl StrideError {
    /// Returns [`StrideError::ShapeMismatch`] if `actual != expected`.
    pub fn check_len(component: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                component,
                expected,
                actual,
            })
        }
    }
}
