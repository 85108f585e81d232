//! Pure JWT payload inspection
//!
//! Client-side only: the payload segment is decoded for its claims and
//! expiry, no signature verification. Anything that fails to decode is
//! reported as `MalformedToken` and treated the same as an expired token
//! downstream.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::AuthError;

/// Claims carried by the backend's access and refresh tokens
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Admin flag when the token carries one; tokens minted before the
    /// claim existed omit it.
    #[serde(default)]
    pub is_data_admin: Option<bool>,
    /// Expiry as a unix timestamp. Absence means the token is never
    /// considered valid.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// Fail-safe expiry check: a token with no expiry claim is expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => now.timestamp() >= exp,
            None => true,
        }
    }
}

/// Decode the claims of a JWT without verifying its signature.
pub fn decode(token: &str) -> Result<Claims, AuthError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::MalformedToken("missing payload segment".to_string()))?;

    // Tokens in the wild carry both padded and unpadded payload segments
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("base64 decode failed: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("claims parse failed: {e}")))
}

/// Whether a token string is currently usable as a credential.
///
/// Undecodable tokens count as expired, never as valid.
pub fn is_usable(token: &str, now: DateTime<Utc>) -> bool {
    match decode(token) {
        Ok(claims) => !claims.is_expired(now),
        Err(_) => false,
    }
}

/// Build an unsigned token with the given payload, for tests across the
/// auth and gateway modules.
#[cfg(test)]
pub(crate) fn make_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{body}.sig")
}
