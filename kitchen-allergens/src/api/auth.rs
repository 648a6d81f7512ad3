//! Request authentication and per-caller rate limiting
//!
//! Custom extractors rather than a middleware layer, so each route opts in
//! by naming the extractor in its handler signature.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use kitchen_common::api::{
    load_shared_secret, now_millis, validate_signature, validate_timestamp, ApiAuthError, CALLER_HEADER,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

use crate::{error::ApiError, AppState};

/// Caller id used when signature checking is disabled and no id was sent
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// A caller whose request signature was verified
///
/// Headers: `x-caller-id`, `x-timestamp` (ms since epoch) and `x-signature`
/// (hex SHA-256 of `"{caller}:{timestamp}:{secret}"`). A shared secret of 0
/// disables the check.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller(pub String);

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<Option<&'a str>, ApiAuthError> {
    match parts.headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| ApiAuthError::MalformedHeader(name)),
        None => Ok(None),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let shared_secret = load_shared_secret(&state.db).await.map_err(|e| match e {
            ApiAuthError::DatabaseError(msg) => ApiError::Internal(format!("Failed to load shared secret: {}", msg)),
            other => ApiError::Unauthorized(other),
        })?;

        let caller = header(parts, CALLER_HEADER)?.filter(|c| !c.is_empty());

        if shared_secret == 0 {
            tracing::debug!("Request authentication disabled (shared_secret = 0)");
            return Ok(Self(caller.unwrap_or(ANONYMOUS_CALLER).to_string()));
        }

        let caller = caller.ok_or(ApiAuthError::MissingHeader(CALLER_HEADER))?;
        let timestamp = header(parts, TIMESTAMP_HEADER)?
            .ok_or(ApiAuthError::MissingHeader(TIMESTAMP_HEADER))?
            .parse::<i64>()
            .map_err(|_| ApiAuthError::MalformedHeader(TIMESTAMP_HEADER))?;
        let signature = header(parts, SIGNATURE_HEADER)?.ok_or(ApiAuthError::MissingHeader(SIGNATURE_HEADER))?;

        validate_timestamp(timestamp, now_millis(), state.auth.max_clock_skew_ms)?;
        validate_signature(signature, caller, timestamp, shared_secret).map_err(|e| {
            tracing::warn!(caller, "Rejected request with invalid signature");
            e
        })?;

        Ok(Self(caller.to_string()))
    }
}

/// An authenticated caller that still had request budget
#[derive(Debug, Clone)]
pub struct RateLimitedCaller(pub String);

#[async_trait]
impl FromRequestParts<AppState> for RateLimitedCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthenticatedCaller(caller) = AuthenticatedCaller::from_request_parts(parts, state).await?;

        state.rate_limiter.check(&caller).map_err(|retry_after| {
            tracing::warn!(caller = %caller, retry_after_ms = retry_after.as_millis() as u64, "Caller rate limited");
            ApiError::TooManyRequests { retry_after }
        })?;

        Ok(Self(caller))
    }
}
