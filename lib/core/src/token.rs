//! Token payload inspection.
//!
//! Compact JWTs carry their claims in a base64url-encoded JSON payload
//! segment. The functions here decode that segment without verifying the
//! signature; verification belongs to the identity client.
//!
//! Every function fails soft: a malformed token yields an empty claim set
//! or an unknown expiry, never an error. Callers must treat missing claims
//! as "unknown", not as "invalid token, reject the request". A token with
//! no readable `exp` claim is considered not expired.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Decodes the claims from a compact token's payload segment.
///
/// Returns an empty map if the token does not have a payload segment, the
/// segment is not valid base64url, or it does not parse as a JSON object.
#[must_use]
pub fn claims(token: &str) -> Map<String, Value> {
    let Some(payload) = token.split('.').nth(1) else {
        return Map::new();
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        return Map::new();
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Returns the expiry instant carried by the token's `exp` claim.
///
/// `None` if the token is undecodable or carries no integer `exp`.
#[must_use]
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = claims(token).get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Returns true if the token carries an `exp` claim in the past.
///
/// A token with an unknown expiry is treated as not expired.
#[must_use]
pub fn is_expired(token: &str) -> bool {
    match expiry(token) {
        Some(at) => at < Utc::now(),
        None => false,
    }
}
