//! Cloud provisioning error types

use thiserror::Error;

/// Errors raised while provisioning or operating stacks
#[derive(Error, Debug)]
pub enum CloudError {
    /// Another operation is already in flight for the same stack.
    #[error(
        "Stack '{stack}' is already being modified ({status})\n\nHint:\n  • Wait for the running operation to finish and retry"
    )]
    Conflict { stack: String, status: String },

    /// The backend refused the request outright (bad template, quota, permissions).
    #[error("Backend rejected the request for '{stack}': {reason}")]
    BackendRejected { stack: String, reason: String },

    #[error("Stack '{stack}' failed to converge: {logical_id}: {reason}{}", rollback_suffix(.rolled_back))]
    ConvergenceFailed {
        stack: String,
        logical_id: String,
        reason: String,
        rolled_back: bool,
    },

    /// Part of an operation failed without aborting it.
    #[error("Degraded: {0}")]
    Degraded(String),

    #[error("{message}\n\nHint:\n  • {remediation}")]
    Precondition {
        message: String,
        remediation: String,
    },

    #[error("Invalid deployment plan: {0}")]
    InvalidPlan(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    /// The backend found nothing to change for an update.
    #[error("No changes to apply to '{0}'")]
    NoChanges(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record already exists: {0}")]
    RecordAlreadyExists(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Transient backend failure (throttling, connection reset) worth retrying.
    #[error("Transient backend error: {0}")]
    Transient(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn rollback_suffix(rolled_back: &bool) -> &'static str {
    if *rolled_back { " (rolled back)" } else { "" }
}

impl CloudError {
    pub fn precondition(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        CloudError::Precondition {
            message: message.into(),
            remediation: remediation.into(),
        }
    }

    /// Whether a polling loop may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Transient(_) | CloudError::Io(_)
        )
    }
}

impl From<tera::Error> for CloudError {
    fn from(err: tera::Error) -> Self {
        CloudError::Template(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
