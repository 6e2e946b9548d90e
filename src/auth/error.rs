//! Error taxonomy for the login and token refresh flows.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown service or an unusable descriptor.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider discovery failed for {issuer}: {reason}")]
    Discovery { issuer: String, reason: String },

    #[error("oauth state doesn't match")]
    StateMismatch,

    /// The authorization server redirected back with an `error` parameter.
    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// Recovered inside the token provider, never returned from `access_token`.
    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("callback listener error: {0}")]
    Listener(String),

    #[error("no authorization callback received within {0:?}")]
    UserTimeout(Duration),

    #[error("authentication cancelled")]
    Cancelled,
}
