//! Governor error types.
//!
//! Admission denials are **not** errors; they are ordinary
//! [`AcquireDecision`](crate::AcquireDecision) values. The variants here cover
//! construction faults and, in strict mode, lease lifecycle misuse.

use thiserror::Error;

/// Errors that can occur when constructing or operating a governor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GovernorError {
    /// The configuration is internally inconsistent.
    #[error("invalid governor configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// An acquire request failed builder validation.
    #[error("invalid acquire request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// A required builder field was not set.
    #[error("missing required field: {field}")]
    MissingField {
        /// The field that was not set.
        field: String,
    },

    /// Strict mode: the lease id was never issued, or the store has already
    /// forgotten it.
    #[error("lease not found: {lease_id}")]
    UnknownLease {
        /// The lease id that was not found.
        lease_id: String,
    },

    /// Strict mode: the lease was already released once.
    #[error("lease {lease_id} was already released")]
    DoubleRelease {
        /// The lease id that was released twice.
        lease_id: String,
    },
}

impl GovernorError {
    /// Creates an [`GovernorError::InvalidConfig`] error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates an [`GovernorError::InvalidRequest`] error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a [`GovernorError::MissingField`] error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}
