//! Utility modules for kitchen-allergens

pub mod db_retry;

pub use db_retry::retry_on_lock;
