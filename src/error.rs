//! Error types for contactlink.
//!
//! All errors are strongly typed using thiserror. Every failure inside a
//! resolution call propagates to the caller as one of the [`IdentityError`]
//! kinds; nothing is logged-and-swallowed.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised while turning caller input into [`crate::Signals`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one of 'email' or 'phoneNumber' must be provided")]
    MissingSignals,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: &'static str,
        max_length: usize,
    },

    #[error("Invalid phone number: {reason}")]
    InvalidPhoneNumber {
        reason: String,
    },
}

/// Top-level error type for contactlink.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The request carried no usable signal. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    /// A store operation failed. Multi-step merges are not rolled back.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl IdentityError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is an invalid-request error.
    #[must_use]
    pub const fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Retrying a partially applied merge is safe: the demote step is
    /// idempotent and the relink step only touches records that still point
    /// at the demoted primary.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) | Self::Internal { .. } => false,
            Self::StoreUnavailable(e) => {
                e.is_contention()
                    || matches!(
                        e,
                        StorageError::ConnectionError(_) | StorageError::BackendError(_)
                    )
            }
        }
    }
}

/// Result type alias for contactlink operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
