//! Error taxonomy for the session and sync cores

use thiserror::Error;

/// Session-level failures, resolved at the session manager boundary.
///
/// `Clone` is required so a single settled refresh outcome can be fanned
/// out to every waiter attached to the shared pending-refresh handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token could not be decoded. Treated identically to an expired token.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The renewal endpoint rejected the refresh token. Terminal for the
    /// session; callers must not retry.
    #[error("refresh token rejected: {0}")]
    RefreshInvalid(String),

    /// Login credentials rejected. Local to the login call.
    #[error("login rejected: {0}")]
    AuthRejected(String),

    /// Network-level failure talking to an auth endpoint. The session is
    /// left in place; a later call may retry.
    #[error("auth transport error: {0}")]
    Transport(String),
}

/// Failures surfaced to callers of the request gateway.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The access token was rejected even after one refresh-and-retry.
    /// A normal per-call failure, not session death.
    #[error("authorization failed after refresh and retry")]
    AuthorizationFailure,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response other than the 401s the gateway recovers from.
    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl ApiError {
    /// Whether this failure means the session has ended and the user must
    /// re-authenticate.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::Auth(AuthError::RefreshInvalid(_)))
    }
}
