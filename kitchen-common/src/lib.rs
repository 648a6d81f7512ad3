//! # Kitchen Common Library
//!
//! Shared code for the kitchen-operations services including:
//! - Allergen code registry and consolidation
//! - Error taxonomy
//! - Bootstrap configuration loading
//! - Database bootstrap
//! - Event types (AllergenEvent) and EventBus
//! - Request signature authentication

pub mod allergens;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod id_utils;

pub use allergens::{consolidate, AllergenCode, AllergenSet};
pub use error::{Error, Result};
