//! Shared test utilities for kitchen-allergens integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use kitchen_allergens::db::{dishes, ingredients, recipes};
use kitchen_allergens::models::{DishIngredientLine, DishRecipeLine, NewIngredient, RecipeLine};
use kitchen_allergens::services::{AllergenEngine, AllergenInference, EngineSettings, InferenceError, UnlimitedRateLimiter};
use kitchen_allergens::{AppState, AuthSettings};
use kitchen_common::events::{AllergenEvent, EventBus};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Temp-file database with the full schema; keep the TempDir alive
pub async fn create_test_db() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().unwrap();
    let pool = kitchen_allergens::db::init_database_pool(&dir.path().join("kitchen.db"), 4)
        .await
        .unwrap();
    (pool, dir)
}

/// Inference stub keyed by ingredient name
#[derive(Default)]
pub struct StubInference {
    answers: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, name: &str, codes: &[&str]) -> Self {
        self.answers
            .insert(name.to_string(), codes.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn fail_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AllergenInference for StubInference {
    async fn infer_allergens(&self, name: &str, _brand: Option<&str>) -> Result<Vec<String>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(name) {
            return Err(InferenceError::Unavailable(format!("no answer for {}", name)));
        }
        Ok(self.answers.get(name).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// A database, an engine wired to a stub, and the event bus it emits on
pub struct TestEngine {
    pub pool: SqlitePool,
    pub engine: AllergenEngine,
    pub event_bus: EventBus,
    pub inference: Arc<StubInference>,
    _dir: TempDir,
}

impl TestEngine {
    pub async fn new(inference: StubInference) -> Self {
        Self::with_settings(inference, EngineSettings::default()).await
    }

    pub async fn with_settings(inference: StubInference, settings: EngineSettings) -> Self {
        let (pool, dir) = create_test_db().await;
        let event_bus = EventBus::new(1000);
        let inference = Arc::new(inference);
        let engine = AllergenEngine::new(pool.clone(), inference.clone(), event_bus.clone(), settings);
        Self {
            pool,
            engine,
            event_bus,
            inference,
            _dir: dir,
        }
    }

    /// Application state with signature checking disabled and no rate limit
    pub async fn app_state(&self) -> AppState {
        disable_auth(&self.pool).await;
        AppState::new(
            self.pool.clone(),
            self.engine.clone(),
            self.event_bus.clone(),
            Arc::new(UnlimitedRateLimiter),
            AuthSettings::default(),
        )
    }

    pub async fn manual_ingredient(&self, id: &str, name: &str, codes: &[&str]) {
        ingredients::insert_ingredient(&self.pool, &NewIngredient::named(name).with_id(id).manual(codes.to_vec()))
            .await
            .unwrap();
    }

    pub async fn inferred_ingredient(&self, id: &str, name: &str, codes: &[&str]) {
        ingredients::insert_ingredient(&self.pool, &NewIngredient::named(name).with_id(id).inferred(codes.to_vec()))
            .await
            .unwrap();
    }

    pub async fn unset_ingredient(&self, id: &str, name: &str) {
        ingredients::insert_ingredient(&self.pool, &NewIngredient::named(name).with_id(id))
            .await
            .unwrap();
    }

    /// Recipe whose lines reference the given ingredient ids in order
    pub async fn recipe(&self, id: &str, name: &str, ingredient_ids: &[&str]) {
        recipes::insert_recipe(&self.pool, Some(id), name).await.unwrap();
        for ingredient_id in ingredient_ids {
            recipes::add_recipe_line(
                &self.pool,
                &RecipeLine {
                    recipe_id: id.to_string(),
                    ingredient_id: ingredient_id.to_string(),
                    quantity: Some(100.0),
                    unit: Some("g".to_string()),
                },
            )
            .await
            .unwrap();
        }
    }

    pub async fn dish(&self, id: &str, name: &str, ingredient_ids: &[&str], recipe_ids: &[&str]) {
        dishes::insert_dish(&self.pool, Some(id), name).await.unwrap();
        for ingredient_id in ingredient_ids {
            dishes::add_dish_ingredient(
                &self.pool,
                &DishIngredientLine {
                    dish_id: id.to_string(),
                    ingredient_id: ingredient_id.to_string(),
                },
            )
            .await
            .unwrap();
        }
        for recipe_id in recipe_ids {
            dishes::add_dish_recipe(
                &self.pool,
                &DishRecipeLine {
                    dish_id: id.to_string(),
                    recipe_id: recipe_id.to_string(),
                    quantity: Some(1.0),
                },
            )
            .await
            .unwrap();
        }
    }

    /// Overwrite an ingredient's stored allergens with undecodable JSON
    pub async fn corrupt_ingredient(&self, id: &str) {
        sqlx::query("UPDATE ingredients SET allergens = 'not json' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

/// Store shared secret 0, which disables request signature checks
pub async fn disable_auth(pool: &SqlitePool) {
    set_shared_secret(pool, 0).await;
}

pub async fn set_shared_secret(pool: &SqlitePool, secret: i64) {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('api_shared_secret', ?)")
        .bind(secret.to_string())
        .execute(pool)
        .await
        .unwrap();
}

/// Every event currently queued on the receiver
pub fn drain_events(rx: &mut broadcast::Receiver<AllergenEvent>) -> Vec<AllergenEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Codes as strings, for comparing against JSON or report output
pub fn codes<T: std::fmt::Display>(codes: impl IntoIterator<Item = T>) -> Vec<String> {
    codes.into_iter().map(|c| c.to_string()).collect()
}
