use std::fmt;

use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;

/// Token handed out when a service has OAuth turned off in its config.
pub const DISABLED_TOKEN: &str = "fake";

/// Cached tokens are refreshed this long before their `exp` claim.
const REFRESH_SKEW_SECS: i64 = 10;

#[derive(Clone, PartialEq, Eq, Default)]
pub struct BearerToken {
    /// Usually a JWT, but only the `exp` claim is ever looked at.
    pub access_token: String,

    pub refresh_token: String,

    /// Decoded without signature verification. Only used to decide when to refresh.
    pub expiry: Option<DateTime<Utc>>,
}

impl BearerToken {
    /// Builds a token from the two strings kept in the credential store.
    pub fn from_raw(access_token: &str, refresh_token: &str) -> Result<Self, TokenError> {
        let expiry = decode_expiry(access_token)?;
        Ok(Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expiry,
        })
    }

    pub fn disabled() -> Self {
        Self {
            access_token: DISABLED_TOKEN.to_string(),
            refresh_token: String::new(),
            expiry: None,
        }
    }

    /// True when the token has no known expiry or expires within the refresh skew.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .is_none_or(|expiry| expiry - Duration::seconds(REFRESH_SKEW_SECS) <= now)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid JWT format")]
    InvalidJwt,
    #[error("Failed to decode base64: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Reads the `exp` claim out of a JWT without checking its signature.
///
/// Returns `Ok(None)` when the token is well formed but carries no usable `exp`.
pub fn decode_expiry(jwt: &str) -> Result<Option<DateTime<Utc>>, TokenError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::InvalidJwt);
    }

    // Some issuers pad the payload even though RFC 7515 forbids it
    let payload_b64 = parts[1].trim_end_matches('=');
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64)?;

    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes)?;

    let exp = payload
        .get("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));

    Ok(exp.and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
}
