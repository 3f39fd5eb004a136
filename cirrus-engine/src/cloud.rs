//! Domain-classified errors returned by external cloud collaborators.

/// Error returned by a cloud API call, already classified into the domain
/// categories the controller maps onto retry behavior.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("resource not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Requeue with exponential backoff.
    Transient,
    /// Recorded as a False condition; no automatic retry until the spec or a
    /// watched dependency changes.
    Terminal,
}

impl CloudError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CloudError::ValidationFailed(_) | CloudError::Forbidden(_) => ErrorClass::Terminal,
            // NotFound is contextual (delete: success; observe: create or
            // import-pending) and handled at the call site before
            // classification applies.
            CloudError::NotFound
            | CloudError::Conflict(_)
            | CloudError::RateLimited
            | CloudError::Timeout
            | CloudError::Transport(_) => ErrorClass::Transient,
        }
    }

    /// Stable reason string surfaced in status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            CloudError::NotFound => "NotFound",
            CloudError::Conflict(_) => "Conflict",
            CloudError::RateLimited => "RateLimited",
            CloudError::Forbidden(_) => "Forbidden",
            CloudError::ValidationFailed(_) => "ValidationFailed",
            CloudError::Timeout => "Timeout",
            CloudError::Transport(_) => "TransportError",
        }
    }
}
