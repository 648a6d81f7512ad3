//! Settings database operations
//!
//! Get/set accessors for the key-value `settings` table.

use sqlx::{Pool, Sqlite};
use kitchen_common::{Error, Result};

#[cfg(test)]
use sqlx::SqlitePool;

const INFERENCE_API_KEY: &str = "inference_api_key";

/// Get the inference service API key from database
///
/// **Returns:** Some(key) if exists, None if not set
pub async fn get_inference_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, INFERENCE_API_KEY).await
}

/// Set the inference service API key in database
pub async fn set_inference_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, INFERENCE_API_KEY, key).await
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting failed: {}", e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_inference_api_key_round_trip() {
        let db = setup_test_db().await;
        assert_eq!(get_inference_api_key(&db).await.unwrap(), None);

        set_inference_api_key(&db, "key-1".to_string()).await.unwrap();
        set_inference_api_key(&db, "key-2".to_string()).await.unwrap();
        assert_eq!(get_inference_api_key(&db).await.unwrap().as_deref(), Some("key-2"));
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let db = setup_test_db().await;
        set_setting(&db, "pool", "many").await.unwrap();
        let result = get_setting::<u32>(&db, "pool").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
