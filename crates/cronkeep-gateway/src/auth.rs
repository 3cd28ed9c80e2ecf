//! Bearer-token check for the HTTP surface.

use axum::http::HeaderMap;
use cronkeep_core::CronkeepError;
use sha2::{Digest, Sha256};

/// Verify `Authorization: Bearer <token>` against the configured admin token.
///
/// With no token configured every caller is refused; the local CLI is the
/// only way to run cycles in that case. Tokens are compared as SHA-256
/// digests so the comparison length does not depend on the input.
pub fn verify_bearer(headers: &HeaderMap, admin_token: Option<&str>) -> Result<(), CronkeepError> {
    let expected = admin_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CronkeepError::PermissionDenied {
            reason: "no admin token configured".to_string(),
        })?;

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| CronkeepError::AuthFailed("missing bearer token".to_string()))?;

    if Sha256::digest(token.as_bytes()) == Sha256::digest(expected.as_bytes()) {
        Ok(())
    } else {
        Err(CronkeepError::AuthFailed("bearer token mismatch".to_string()))
    }
}
