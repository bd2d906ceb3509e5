//! Core error taxonomy.
//!
//! The variants map directly to how callers must react:
//!
//! - [`CoreError::Conflict`]: a conditional update's guard failed because
//!   another process already advanced the state. Expected under concurrency;
//!   callers stop, they never retry the same logical operation.
//! - [`CoreError::NotFound`]: a referenced entity is missing, which signals a
//!   data-consistency problem upstream.
//! - [`CoreError::Validation`]: a business rule was violated; rejected
//!   synchronously to the caller.
//! - [`CoreError::Infrastructure`]: persistence or queue unreachable; fatal
//!   for the current job attempt, subject to the queue's own retry policy.
//!
//! A failed notification dispatch is deliberately not an error variant: the
//! dispatcher reports it as data (`DispatchOutcome`) and the caller schedules
//! bounded retries instead of failing the slot-level operation.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl CoreError {
    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<Uuid>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is a lost-race conflict, i.e. safe to swallow.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_recognized() {
        assert!(CoreError::Conflict("slot not open").is_conflict());
        assert!(!CoreError::Validation("bad window".into()).is_conflict());
    }

    #[test]
    fn not_found_displays_kind_and_id() {
        let id = Uuid::nil();
        let err = CoreError::not_found("slot", id);
        assert_eq!(err.to_string(), format!("slot not found: {id}"));
    }
}
