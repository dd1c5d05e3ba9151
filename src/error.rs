//! Error types for statetable

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Rejected input: empty entry, undeclared field, malformed key.
    /// Nothing was mutated and no change was recorded.
    InvalidInput(String),
    /// An error surfaced by the durable backend, propagated verbatim.
    BackendFailure(String),
    /// The change log and the overlay disagree during rollback. Fatal:
    /// the enclosing operation must abort rather than continue on a
    /// possibly corrupt overlay.
    IntegrityViolation(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            StateError::BackendFailure(msg) => write!(f, "Backend failure: {}", msg),
            StateError::IntegrityViolation(msg) => write!(f, "Integrity violation: {}", msg),
        }
    }
}

impl std::error::Error for StateError {}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, StateError>;
