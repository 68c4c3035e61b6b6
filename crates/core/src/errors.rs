use thiserror::Error;

/// Failure taxonomy shared by every lifecycle component.
///
/// The setup orchestrator collects these instead of propagating them: a
/// failed sub-step must never abort the independent steps that follow it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no workspace or portal identity could be resolved: {0}")]
    IdentityNotFound(String),
    #[error("portal domain `{0}` matches more than one pending integration")]
    AmbiguousIdentity(String),
    #[error("linking token is invalid, expired, or already used")]
    TokenInvalid,
    #[error("portal access token is expired")]
    TokenExpired,
    #[error("token refresh was rejected by the portal; re-authorization is required")]
    TokenRefreshFailed,
    #[error("portal api error: {0}")]
    RemoteApi(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteApi(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// True for failures the caller can repair by re-running the same
    /// operation (stale revision, transient remote error). Sticky failures
    /// such as a rejected refresh token are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::RemoteApi(_) | Self::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn remote_errors_pass_the_portal_message_through() {
        let error = EngineError::remote("WRONG_AUTH_TYPE: wrong authorization type");
        assert_eq!(error.to_string(), "portal api error: WRONG_AUTH_TYPE: wrong authorization type");
    }

    #[test]
    fn refresh_failure_is_not_retryable() {
        assert!(!EngineError::TokenRefreshFailed.is_retryable());
        assert!(EngineError::Conflict("stale revision".into()).is_retryable());
    }
}
