//! Configuration resolution for kitchen-allergens
//!
//! The inference API key resolves Database → ENV → TOML. Everything else
//! comes from the bootstrap [`TomlConfig`] after its env overrides.

use kitchen_common::config::TomlConfig;
use kitchen_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::{AllergenInference, EngineSettings, HttpInferenceClient, KeywordInference};

pub const INFERENCE_API_KEY_ENV: &str = "KITCHEN_INFERENCE_API_KEY";

/// Resolve the inference service API key
///
/// **Priority:** Database → ENV → TOML. None when no source has a usable key.
pub async fn resolve_inference_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let mut sources = Vec::new();

    let db_key = crate::db::settings::get_inference_api_key(db).await?;
    if let Some(key) = &db_key {
        if is_valid_key(key) {
            sources.push("database");
        }
    }

    let env_key = std::env::var(INFERENCE_API_KEY_ENV).ok();
    if let Some(key) = &env_key {
        if is_valid_key(key) {
            sources.push("environment");
        }
    }

    let toml_key = toml_config.inference.api_key.as_ref();
    if let Some(key) = toml_key {
        if is_valid_key(key) {
            sources.push("TOML");
        }
    }

    if sources.len() > 1 {
        warn!(
            "Inference API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key.filter(|k| is_valid_key(k)) {
        info!("Inference API key loaded from database");
        return Ok(Some(key));
    }

    if let Some(key) = env_key.filter(|k| is_valid_key(k)) {
        info!("Inference API key loaded from environment variable");
        return Ok(Some(key));
    }

    if let Some(key) = toml_key.filter(|k| is_valid_key(k)) {
        info!("Inference API key loaded from TOML config");
        return Ok(Some(key.clone()));
    }

    Ok(None)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Build the inference capability from configuration
///
/// Uses the HTTP client when an endpoint is configured, the keyword matcher
/// otherwise.
pub async fn build_inference(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Arc<dyn AllergenInference>> {
    let Some(endpoint) = toml_config.inference.endpoint.as_ref().filter(|e| is_valid_key(e)) else {
        info!("No inference endpoint configured, using keyword inference");
        return Ok(Arc::new(KeywordInference::new()));
    };

    let api_key = resolve_inference_api_key(db, toml_config).await?;
    if api_key.is_none() {
        warn!(endpoint = %endpoint, "Inference endpoint configured without an API key");
    }

    let client = HttpInferenceClient::new(
        endpoint.clone(),
        api_key,
        Duration::from_secs(toml_config.inference.timeout_secs),
        toml_config.inference.requests_per_second,
    )
    .map_err(|e| Error::Config(format!("Failed to build inference client: {}", e)))?;

    info!(endpoint = %endpoint, "Using HTTP inference service");
    Ok(Arc::new(client))
}

/// Engine tuning from the bootstrap config
pub fn engine_settings(toml_config: &TomlConfig) -> EngineSettings {
    EngineSettings {
        worker_pool_size: toml_config.engine.worker_pool_size,
        max_lock_wait_ms: toml_config.database.max_lock_wait_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitchen_common::db::create_schema;
    use serial_test::serial;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key("   "));
        assert!(!is_valid_key(""));
    }

    #[tokio::test]
    #[serial]
    async fn test_database_key_wins() {
        let pool = setup_test_db().await;
        crate::db::settings::set_inference_api_key(&pool, "db-key".to_string())
            .await
            .unwrap();
        std::env::set_var(INFERENCE_API_KEY_ENV, "env-key");
        let mut config = TomlConfig::default();
        config.inference.api_key = Some("toml-key".to_string());

        let key = resolve_inference_api_key(&pool, &config).await.unwrap();
        std::env::remove_var(INFERENCE_API_KEY_ENV);

        assert_eq!(key.as_deref(), Some("db-key"));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_then_toml() {
        let pool = setup_test_db().await;
        let mut config = TomlConfig::default();
        config.inference.api_key = Some("toml-key".to_string());

        std::env::set_var(INFERENCE_API_KEY_ENV, "env-key");
        let key = resolve_inference_api_key(&pool, &config).await.unwrap();
        std::env::remove_var(INFERENCE_API_KEY_ENV);
        assert_eq!(key.as_deref(), Some("env-key"));

        let key = resolve_inference_api_key(&pool, &config).await.unwrap();
        assert_eq!(key.as_deref(), Some("toml-key"));

        config.inference.api_key = None;
        assert!(resolve_inference_api_key(&pool, &config).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_keyword_inference_without_endpoint() {
        let pool = setup_test_db().await;
        let inference = build_inference(&pool, &TomlConfig::default()).await.unwrap();
        assert_eq!(inference.name(), "keyword");

        let mut config = TomlConfig::default();
        config.inference.endpoint = Some("http://127.0.0.1:9/infer".to_string());
        let inference = build_inference(&pool, &config).await.unwrap();
        assert_eq!(inference.name(), "http");
    }
}
