//! API authentication via caller signature validation
//!
//! Authenticated requests carry three headers:
//! - `x-caller-id`: stable caller identity (also the rate-limit key)
//! - `x-timestamp`: Unix epoch milliseconds
//! - `x-signature`: hex SHA-256 of `"{caller}:{timestamp}:{shared_secret}"`
//!
//! The shared secret lives in the `settings` table under `api_shared_secret`.
//! A secret of 0 disables signature checking.
//!
//! This module contains only pure functions and database operations; the
//! axum extractor lives in the service crate.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const CALLER_HEADER: &str = "x-caller-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Authentication error types
#[derive(Debug, Clone, Error)]
pub enum ApiAuthError {
    /// Timestamp outside acceptable window
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp { timestamp: i64, now: i64, reason: String },

    /// Signature does not match calculated value
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed {0} header")]
    MalformedHeader(&'static str),

    /// Database error loading shared secret
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Load shared secret from database settings, generating one on first use
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'api_shared_secret'")
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => value
            .parse::<i64>()
            .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e))),
        None => initialize_shared_secret(db).await,
    }
}

/// Generate and store a random non-zero shared secret
pub async fn initialize_shared_secret(db: &SqlitePool) -> Result<i64, ApiAuthError> {
    use rand::Rng;

    // ThreadRng is !Send; drop it before the first await
    let secret: i64 = {
        let mut rng = rand::thread_rng();
        loop {
            let val = rng.gen::<i64>();
            if val != 0 {
                break val;
            }
        }
    };

    // INSERT OR IGNORE keeps whichever secret a concurrent initializer stored first
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let stored: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'api_shared_secret'")
        .fetch_one(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    stored
        .parse::<i64>()
        .map_err(|e| ApiAuthError::DatabaseError(format!("Invalid i64: {}", e)))
}

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate that `timestamp` lies within `max_skew_ms` of `now` in either direction
pub fn validate_timestamp(timestamp: i64, now: i64, max_skew_ms: i64) -> Result<(), ApiAuthError> {
    // Header-supplied values can sit at the i64 extremes
    let Some(diff) = now.checked_sub(timestamp) else {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: "Timestamp out of range".to_string(),
        });
    };

    if diff > max_skew_ms {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms too old (max {}ms past)", diff, max_skew_ms),
        });
    }

    if diff < 0 && diff.unsigned_abs() > max_skew_ms.unsigned_abs() {
        return Err(ApiAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("Timestamp {}ms in future (max {}ms future)", diff.unsigned_abs(), max_skew_ms),
        });
    }

    Ok(())
}

/// Calculate the request signature as 64 hex characters
pub fn calculate_signature(caller: &str, timestamp: i64, shared_secret: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", caller, timestamp, shared_secret).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate a provided signature against the calculated one
pub fn validate_signature(
    provided: &str,
    caller: &str,
    timestamp: i64,
    shared_secret: i64,
) -> Result<(), ApiAuthError> {
    let calculated = calculate_signature(caller, timestamp, shared_secret);
    if provided.eq_ignore_ascii_case(&calculated) {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidSignature)
    }
}
