//! Error types for the tailoring engine
//!
//! All fallible operations return [`TailorResult`]. Variants follow the
//! engine's failure classes:
//!
//! | Class | Variant | Caller action |
//! |-------|---------|---------------|
//! | Validation conflict | `ValidationConflict` | transaction aborted, client may retry |
//! | Registration | `Registration` | fix the template definition |
//! | Store / connectivity | `Store` | current transaction is lost, worker survives |
//! | Internal invariant | `Internal` | programming error, never retried |
//! | API misuse | `InvalidState`, `InvalidInput` | fix the call sequence or arguments |

use thiserror::Error;

/// Result type alias for engine operations
pub type TailorResult<T> = std::result::Result<T, TailorError>;

/// Error type for the tailoring engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TailorError {
    /// Transaction aborted at commit time (lock abort or version mismatch)
    ///
    /// Never retried internally.
    #[error("validation conflict: {reason}")]
    ValidationConflict {
        /// Human-readable description of the conflict(s)
        reason: String,
    },

    /// Malformed or incomplete template registration
    #[error("registration error: {reason}")]
    Registration {
        /// What was wrong with the registration
        reason: String,
    },

    /// The backing store failed or is unreachable
    #[error("store error: {message}")]
    Store {
        /// Error reported by the store collaborator
        message: String,
    },

    /// Internal invariant violated (unknown relation, lock-state assertion)
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },

    /// Operation not allowed in the current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state mismatch
        message: String,
    },

    /// Bad runtime argument or configuration value
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected
        reason: String,
    },
}

impl TailorError {
    /// Create a validation conflict error
    pub fn conflict(reason: impl Into<String>) -> Self {
        TailorError::ValidationConflict {
            reason: reason.into(),
        }
    }

    /// Create a registration error
    pub fn registration(reason: impl Into<String>) -> Self {
        TailorError::Registration {
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        TailorError::Store {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        TailorError::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        TailorError::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        TailorError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// True for commit-time validation conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, TailorError::ValidationConflict { .. })
    }

    /// True if the error ended the worker's current transaction
    ///
    /// Registration, state and input errors leave any in-flight
    /// transaction untouched.
    pub fn is_fatal_for_transaction(&self) -> bool {
        matches!(
            self,
            TailorError::ValidationConflict { .. } | TailorError::Store { .. }
        )
    }
}
