//! Allergen engine services
//!
//! Leaf first: inference capability, ingredient resolver, recipe and dish
//! aggregators, batch orchestrator, user edits, per-caller rate limiting.

pub mod allergen_editor;
pub mod batch_orchestrator;
pub mod dish_aggregator;
pub mod inference;
pub mod ingredient_resolver;
pub mod rate_limiter;
pub mod recipe_aggregator;

pub use allergen_editor::{AllergenEditor, IngredientUpdate};
pub use batch_orchestrator::{BatchOrchestrator, Dependents};
pub use dish_aggregator::DishAggregator;
pub use inference::{AllergenInference, HttpInferenceClient, InferenceError, KeywordInference};
pub use ingredient_resolver::{DetectionOutcome, DetectionStatus, IngredientResolver, Resolution};
pub use rate_limiter::{CallerRateLimiter, GovernorRateLimiter, UnlimitedRateLimiter};
pub use recipe_aggregator::RecipeAggregator;

use kitchen_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Tuning shared by every engine component
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub worker_pool_size: usize,
    pub max_lock_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_lock_wait_ms: 5000,
        }
    }
}

/// The wired-up engine: one resolver shared by both aggregators and the batch
#[derive(Clone)]
pub struct AllergenEngine {
    pub resolver: IngredientResolver,
    pub recipes: RecipeAggregator,
    pub dishes: DishAggregator,
    pub batch: BatchOrchestrator,
    pub editor: AllergenEditor,
}

impl AllergenEngine {
    pub fn new(
        db: SqlitePool,
        inference: Arc<dyn AllergenInference>,
        event_bus: EventBus,
        settings: EngineSettings,
    ) -> Self {
        let resolver = IngredientResolver::new(db.clone(), inference, event_bus.clone(), settings.max_lock_wait_ms);
        let recipes = RecipeAggregator::new(db.clone(), resolver.clone(), event_bus.clone(), settings.max_lock_wait_ms);
        let dishes = DishAggregator::new(
            db.clone(),
            resolver.clone(),
            recipes.clone(),
            event_bus.clone(),
            settings.max_lock_wait_ms,
        );
        let batch = BatchOrchestrator::new(
            db.clone(),
            recipes.clone(),
            dishes.clone(),
            event_bus.clone(),
            settings.worker_pool_size,
        );
        let editor = AllergenEditor::new(db, event_bus, settings.max_lock_wait_ms);

        Self {
            resolver,
            recipes,
            dishes,
            batch,
            editor,
        }
    }
}
