//! Database access for kitchen-allergens
//!
//! Catalog reads and writes (ingredients, recipes, dishes), the aggregate
//! cache and the settings table, all on the shared SQLite database.

pub mod aggregates;
pub mod dishes;
pub mod ingredients;
pub mod recipes;
pub mod settings;

use kitchen_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the catalog database, creating the schema if needed
pub async fn init_database_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    tracing::debug!(path = %db_path.display(), "Connecting to database");
    kitchen_common::db::init_database(db_path, max_connections).await
}
