//! Database initialization
//!
//! Opens (or creates) the SQLite catalog and makes sure every table the
//! allergen engine reads or writes exists. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas on the connect options apply to every pooled connection
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_ingredients_table(pool).await?;
    create_recipe_tables(pool).await?;
    create_dish_tables(pool).await?;
    create_aggregates_table(pool).await?;
    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ingredients_table(pool: &SqlitePool) -> Result<()> {
    // allergen_source: {"manual": bool, "ai": bool}
    // generation: bumped on every allergen write; aggregates snapshot it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            brand TEXT,
            allergens TEXT NOT NULL DEFAULT '[]',
            allergen_source TEXT NOT NULL DEFAULT '{"manual":false,"ai":false}',
            generation INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_recipe_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_lines (
            line_id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
            quantity REAL,
            unit TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipe_lines_recipe ON recipe_lines(recipe_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipe_lines_ingredient ON recipe_lines(ingredient_id)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_dish_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dishes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dish_ingredients (
            line_id INTEGER PRIMARY KEY AUTOINCREMENT,
            dish_id TEXT NOT NULL REFERENCES dishes(id) ON DELETE CASCADE,
            ingredient_id TEXT NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // recipe_id is not a foreign key: a deleted recipe surfaces as a warning
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dish_recipes (
            line_id INTEGER PRIMARY KEY AUTOINCREMENT,
            dish_id TEXT NOT NULL REFERENCES dishes(id) ON DELETE CASCADE,
            recipe_id TEXT NOT NULL,
            quantity REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dish_ingredients_dish ON dish_ingredients(dish_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dish_ingredients_ingredient ON dish_ingredients(ingredient_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dish_recipes_dish ON dish_recipes(dish_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dish_recipes_recipe ON dish_recipes(recipe_id)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_aggregates_table(pool: &SqlitePool) -> Result<()> {
    // One row per recipe/dish; always written by a single upsert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS allergen_aggregates (
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            allergens TEXT NOT NULL,
            source_breakdown TEXT NOT NULL,
            warnings TEXT NOT NULL DEFAULT '[]',
            generation TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            stale INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entity_kind, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("kitchen.db"), 2).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "allergen_aggregates",
            "dish_ingredients",
            "dish_recipes",
            "dishes",
            "ingredients",
            "recipe_lines",
            "recipes",
            "settings",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kitchen.db");
        let pool = init_database(&path, 2).await.unwrap();
        create_schema(&pool).await.unwrap();
        pool.close().await;

        init_database(&path, 2).await.unwrap();
    }
}
