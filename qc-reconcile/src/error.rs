//! Error types.

use std::time::Duration;

use thiserror::Error;

use crate::clients::ApiError;

/// Errors surfaced by the retry executor, the poller and the orchestrators.
///
/// Every variant names the operation and the resource it was acting on so a
/// failure can be diagnosed from the message alone.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The control plane rejected the call with a permanent error.
    #[error("{operation} {resource}: {source}")]
    Remote {
        operation: &'static str,
        resource: String,
        source: ApiError,
    },

    /// Transient errors persisted past the retry budget.
    #[error("{operation} {resource}: gave up after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        resource: String,
        attempts: u32,
        source: ApiError,
    },

    /// A poll loop ran out of time while the resource was still transitioning.
    #[error("{operation} {resource}: still {status} after {waited:?}")]
    TransitionTimeout {
        operation: &'static str,
        resource: String,
        status: String,
        waited: Duration,
    },

    /// The resource settled in a status that ends the current flow.
    #[error("{operation} {resource}: entered failure status {status}")]
    TransitionFailed {
        operation: &'static str,
        resource: String,
        status: String,
    },

    /// A resource expected to be live no longer exists.
    #[error("{operation} {resource}: resource no longer exists")]
    Vanished {
        operation: &'static str,
        resource: String,
    },

    #[error("{operation} {resource}: {reason}")]
    PreconditionViolation {
        operation: &'static str,
        resource: String,
        reason: String,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

impl ReconcileError {
    /// Name of the operation that failed, if the error is tied to one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            ReconcileError::Remote { operation, .. }
            | ReconcileError::Exhausted { operation, .. }
            | ReconcileError::TransitionTimeout { operation, .. }
            | ReconcileError::TransitionFailed { operation, .. }
            | ReconcileError::Vanished { operation, .. }
            | ReconcileError::PreconditionViolation { operation, .. } => Some(operation),
            ReconcileError::InvalidSpec(_) => None,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;
