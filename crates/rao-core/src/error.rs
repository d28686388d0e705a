//! Unified error types for the RAO ecosystem
//!
//! This module provides a common error type [`RaoError`] that can represent
//! errors from any part of the engine. Domain-specific failures are converted
//! to `RaoError` for uniform handling at API boundaries.
//!
//! Note that running out of time budget is *not* an error: the search tree
//! returns its best-so-far result instead.

use thiserror::Error;

/// Unified error type for all RAO operations.
#[derive(Error, Debug)]
pub enum RaoError {
    /// Malformed perimeter request (e.g. curative perimeter on a preventive state).
    /// Fatal for that perimeter only.
    #[error("Invalid perimeter: {0}")]
    InvalidPerimeter(String),

    /// No feasible linear solution for a state. Recorded as a FAILURE status
    /// for that state; sibling evaluations continue.
    #[error("Linear problem infeasible: {0}")]
    SolverInfeasible(String),

    /// External sensitivity/flow engine failure. The affected state's branch
    /// of the search is marked FAILURE and excluded.
    #[error("Sensitivity computation failed: {0}")]
    SensitivityComputation(String),

    /// Attempt to mutate an aggregated result after it was frozen.
    #[error("Result is immutable: {0}")]
    ImmutableResult(String),

    /// Data validation errors (inconsistent catalog, unknown IDs, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using RaoError.
pub type RaoResult<T> = Result<T, RaoError>;

impl From<anyhow::Error> for RaoError {
    fn from(err: anyhow::Error) -> Self {
        RaoError::Other(err.to_string())
    }
}

impl From<String> for RaoError {
    fn from(s: String) -> Self {
        RaoError::Other(s)
    }
}

impl From<&str> for RaoError {
    fn from(s: &str) -> Self {
        RaoError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RaoError::InvalidPerimeter("curative perimeter on preventive state".into());
        assert!(err.to_string().contains("Invalid perimeter"));
        assert!(err.to_string().contains("preventive state"));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> RaoResult<()> {
            Err(RaoError::Validation("test".into()))
        }

        fn outer() -> RaoResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
