//! Cookie/hash authentication for privileged admin methods.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meshcore_crypto::constant_time::digest_matches_hex;
use meshcore_crypto::hash::sha256_parts;

use crate::benc::Dict;
use crate::error::RequestError;

/// Current wall-clock time in whole seconds
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hex SHA-256 of `password || cookie`, as a client computes it.
#[must_use]
pub fn auth_hash(password: &[u8], cookie: &[u8]) -> String {
    hex::encode(sha256_parts(&[password, cookie]))
}

/// Check the `cookie` and `hash` fields of an `auth` request at time `now`.
pub(crate) fn verify(
    request: &Dict,
    password: &[u8],
    lifetime: Duration,
    now: u64,
) -> Result<(), RequestError> {
    let cookie = request.get_bytes("cookie").ok_or(RequestError::AuthFailed)?;
    let hash = request.get_bytes("hash").ok_or(RequestError::AuthFailed)?;

    let issued: u64 = std::str::from_utf8(cookie)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RequestError::AuthFailed)?;
    // Cookies from the future are clock skew at best.
    if issued > now || now - issued > lifetime.as_secs() {
        tracing::debug!("stale admin cookie {} at {}", issued, now);
        return Err(RequestError::AuthFailed);
    }

    let expected = sha256_parts(&[password, cookie]);
    if !digest_matches_hex(&expected, hash) {
        return Err(RequestError::AuthFailed);
    }
    Ok(())
}
