//! Unified error types for the PST crates.
//!
//! Every function that produces a compound value returns [`PstResult`];
//! callers short-circuit with `?` and drop intermediate objects on the way
//! out. Three kinds of failure are distinguished:
//!
//! - [`PstError::Internal`]: an invariant was violated ("too many schedule
//!   rows", "no solution found"). Not recoverable.
//! - [`PstError::Unknown`]: the algorithm hit a design limit ("unable to
//!   carry dependences"). Not retried at a higher level.
//! - [`PstError::Arithmetic`]: integer overflow while combining rows.

use thiserror::Error;

/// Unified error type for all PST operations.
#[derive(Error, Debug)]
pub enum PstError {
    /// Invariant violation inside the library.
    #[error("internal error: {0}")]
    Internal(String),

    /// Algorithmic failure at a design limit.
    #[error("{0}")]
    Unknown(String),

    /// Integer overflow or other arithmetic failure.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

impl PstError {
    pub fn internal(msg: impl Into<String>) -> Self {
        PstError::Internal(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        PstError::Unknown(msg.into())
    }

    pub fn arithmetic(msg: impl Into<String>) -> Self {
        PstError::Arithmetic(msg.into())
    }
}

/// Convenience type alias for Results using PstError.
pub type PstResult<T> = Result<T, PstError>;

// Conversion from anyhow::Error for callers that mix in ad-hoc errors.
impl From<anyhow::Error> for PstError {
    fn from(err: anyhow::Error) -> Self {
        PstError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PstError::internal("too many schedule rows");
        assert!(err.to_string().contains("internal error"));
        assert!(err.to_string().contains("too many schedule rows"));
    }

    #[test]
    fn test_unknown_display_is_bare() {
        let err = PstError::unknown("unable to carry dependences");
        assert_eq!(err.to_string(), "unable to carry dependences");
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> PstResult<()> {
            Err(PstError::arithmetic("overflow"))
        }

        fn outer() -> PstResult<()> {
            inner()?;
            Ok(())
        }

        assert!(matches!(outer(), Err(PstError::Arithmetic(_))));
    }
}
