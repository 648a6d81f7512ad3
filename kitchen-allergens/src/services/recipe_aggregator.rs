//! Recipe aggregation
//!
//! Unions the resolved allergen sets of every line of a recipe and records
//! which ingredient contributed which allergen. Results are cached; a cached
//! aggregate is reused while its generation stamp matches the current
//! ingredient generations and it has not been explicitly marked stale.

use chrono::Utc;
use kitchen_common::events::{AllergenEvent, EntityKind, EventBus};
use kitchen_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

use super::ingredient_resolver::{IngredientResolver, Resolution};
use crate::db::{aggregates, recipes};
use crate::models::{
    AggregateResult, AggregationWarning, AllergenContributor, GenerationStamp, Recipe, MISSING_GENERATION,
};

#[derive(Clone)]
pub struct RecipeAggregator {
    db: SqlitePool,
    resolver: IngredientResolver,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl RecipeAggregator {
    pub fn new(db: SqlitePool, resolver: IngredientResolver, event_bus: EventBus, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            resolver,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Aggregate one recipe, reusing the cached result when it is fresh
    ///
    /// Errors: `NotFound` for an unknown recipe, `DatastoreUnavailable` and
    /// `CorruptRecord` from storage. Everything else is a warning on the result.
    pub async fn aggregate(&self, recipe_id: &str, force_refresh: bool) -> Result<AggregateResult> {
        let recipe = recipes::load_recipe(&self.db, recipe_id)
            .await?
            .ok_or_else(|| Error::not_found("recipe", recipe_id))?;

        if !force_refresh {
            if let Some(cached) = aggregates::load_aggregate(&self.db, EntityKind::Recipe, recipe_id).await? {
                let current = self.current_stamp(recipe_id).await?;
                if cached.is_fresh_for(&current) {
                    debug!(recipe_id, "Serving cached recipe aggregate");
                    return Ok(cached.result);
                }
                debug!(recipe_id, stale = cached.stale, "Cached recipe aggregate is stale");
            }
        }

        self.compute(&recipe).await
    }

    /// Generation stamp the recipe would get if aggregated now
    pub async fn current_stamp(&self, recipe_id: &str) -> Result<GenerationStamp> {
        let mut stamp = GenerationStamp::new();
        for (ingredient_id, generation) in recipes::recipe_ingredient_generations(&self.db, recipe_id).await? {
            stamp.record(ingredient_id, generation);
        }
        Ok(stamp)
    }

    async fn compute(&self, recipe: &Recipe) -> Result<AggregateResult> {
        let lines = recipes::load_recipe_lines(&self.db, &recipe.id).await?;
        let mut result = AggregateResult::empty(EntityKind::Recipe, recipe.id.clone());
        // One resolution per ingredient, however many lines reference it
        let mut resolved: HashMap<String, Resolution> = HashMap::new();

        for entry in lines {
            let Some(ingredient) = entry.ingredient else {
                result.warn(AggregationWarning::IngredientNotFound {
                    ingredient_id: entry.line.ingredient_id.clone(),
                });
                result.generation.record(entry.line.ingredient_id, MISSING_GENERATION);
                continue;
            };

            let resolution = match resolved.get(&ingredient.id) {
                Some(resolution) => resolution.clone(),
                None => {
                    let resolution = self.resolver.resolve(&ingredient).await?;
                    resolved.insert(ingredient.id.clone(), resolution.clone());
                    resolution
                }
            };

            for warning in resolution.warnings {
                result.warn(warning);
            }
            result.generation.record(ingredient.id.clone(), resolution.generation);

            for code in &resolution.allergens {
                result.add_contributor(
                    *code,
                    AllergenContributor {
                        ingredient_id: ingredient.id.clone(),
                        ingredient_name: ingredient.name.clone(),
                        brand: ingredient.brand.clone(),
                        quantity: entry.line.quantity,
                        unit: entry.line.unit.clone(),
                        provenance: resolution.provenance,
                        recipe_id: None,
                        recipe_name: None,
                    },
                );
            }
        }

        result.computed_at = Utc::now();
        aggregates::store_aggregate(&self.db, &result, self.max_lock_wait_ms).await?;

        debug!(
            recipe_id = %recipe.id,
            allergens = result.allergens.len(),
            warnings = result.warnings.len(),
            "Recipe aggregate written"
        );
        self.event_bus.emit_lossy(AllergenEvent::AggregateWritten {
            kind: EntityKind::Recipe,
            entity_id: recipe.id.clone(),
            allergens: result.allergens.iter().copied().collect(),
            timestamp: result.computed_at,
        });

        Ok(result)
    }
}
