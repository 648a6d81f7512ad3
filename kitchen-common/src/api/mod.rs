//! Shared HTTP API primitives
//!
//! Framework-free authentication helpers; each service wraps these in its
//! own extractors.

pub mod auth;

pub use auth::{
    calculate_signature, initialize_shared_secret, load_shared_secret, now_millis,
    validate_signature, validate_timestamp, ApiAuthError, CALLER_HEADER, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
