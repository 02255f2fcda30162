//! Rotating attendance token derivation and verification.
//!
//! Tokens are derived from a per-session secret and the current time window,
//! so the server never has to store them: any holder of the secret can
//! recompute the token for a given window. Verification therefore always
//! recomputes instead of trusting a cached value.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of hex characters exposed as the verification token.
pub const TOKEN_LEN: usize = 16;

/// Index of the rotation window containing `now`.
///
/// Windows are aligned to the Unix epoch: window `w` covers
/// `[w * rotation_ms, (w + 1) * rotation_ms)`.
pub fn window_index(now: DateTime<Utc>, rotation_seconds: i32) -> i64 {
    let rotation_ms = i64::from(rotation_seconds.max(1)) * 1000;
    now.timestamp_millis().div_euclid(rotation_ms)
}

/// Instant at which tokens for `window` stop being current.
pub fn window_expiry(window: i64, rotation_seconds: i32) -> DateTime<Utc> {
    let rotation_ms = i64::from(rotation_seconds.max(1)) * 1000;
    DateTime::from_timestamp_millis((window + 1) * rotation_ms).expect("window expiry in range")
}

/// Derives the token for one window: the first [`TOKEN_LEN`] hex characters
/// of `HMAC-SHA256(secret, "{secret}-{window}")`.
pub fn token_for_window(secret: &str, window: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(format!("{secret}-{window}").as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut token = hex::encode(digest);
    token.truncate(TOKEN_LEN);
    token
}

/// Checks a submitted token against the current window and up to
/// `tolerance` windows back. `tolerance` of 1 accepts the current and
/// previous window; anything older is rejected.
pub fn verify_token(
    secret: &str,
    rotation_seconds: i32,
    tolerance: i64,
    submitted: &str,
    now: DateTime<Utc>,
) -> bool {
    if submitted.len() != TOKEN_LEN {
        return false;
    }
    let current = window_index(now, rotation_seconds);
    (0..=tolerance.max(0)).any(|delta| token_for_window(secret, current - delta) == submitted)
}
