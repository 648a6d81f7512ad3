//! Dish aggregation
//!
//! A dish unions its direct ingredients with the aggregates of its recipes.
//! Recipe contributions always come from [`RecipeAggregator::aggregate`],
//! never from a second read of raw recipe lines, so a dish is exactly as
//! fresh as the recipe aggregates it reads.

use chrono::Utc;
use kitchen_common::events::{AllergenEvent, EntityKind, EventBus};
use kitchen_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::ingredient_resolver::{IngredientResolver, Resolution};
use super::recipe_aggregator::RecipeAggregator;
use crate::db::{aggregates, dishes, recipes};
use crate::models::{
    AggregateResult, AggregationWarning, AllergenContributor, Dish, GenerationStamp, MISSING_GENERATION,
};

fn ingredient_key(ingredient_id: &str) -> String {
    format!("ingredient:{}", ingredient_id)
}

fn recipe_key(recipe_id: &str) -> String {
    format!("recipe:{}", recipe_id)
}

fn recipe_ingredient_key(recipe_id: &str, ingredient_id: &str) -> String {
    format!("recipe:{}/{}", recipe_id, ingredient_id)
}

#[derive(Clone)]
pub struct DishAggregator {
    db: SqlitePool,
    resolver: IngredientResolver,
    recipes: RecipeAggregator,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl DishAggregator {
    pub fn new(
        db: SqlitePool,
        resolver: IngredientResolver,
        recipes: RecipeAggregator,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            resolver,
            recipes,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Aggregate one dish, reusing the cached result when it is fresh
    pub async fn aggregate(&self, dish_id: &str, force_refresh: bool) -> Result<AggregateResult> {
        let dish = dishes::load_dish(&self.db, dish_id)
            .await?
            .ok_or_else(|| Error::not_found("dish", dish_id))?;

        if !force_refresh {
            if let Some(cached) = aggregates::load_aggregate(&self.db, EntityKind::Dish, dish_id).await? {
                let current = self.current_stamp(dish_id).await?;
                if cached.is_fresh_for(&current) {
                    debug!(dish_id, "Serving cached dish aggregate");
                    return Ok(cached.result);
                }
                debug!(dish_id, stale = cached.stale, "Cached dish aggregate is stale");
            }
        }

        self.compute(&dish).await
    }

    /// Generation stamp the dish would get if aggregated now
    ///
    /// Covers direct ingredients and the ingredients of every referenced
    /// recipe, so an ingredient edit two levels down is still visible here.
    pub async fn current_stamp(&self, dish_id: &str) -> Result<GenerationStamp> {
        let mut stamp = GenerationStamp::new();

        for (ingredient_id, generation) in dishes::dish_ingredient_generations(&self.db, dish_id).await? {
            stamp.record(ingredient_key(&ingredient_id), generation);
        }

        for edge in dishes::load_dish_recipes(&self.db, dish_id).await? {
            let recipe_id = &edge.line.recipe_id;
            if edge.recipe_name.is_none() {
                stamp.record(recipe_key(recipe_id), MISSING_GENERATION);
                continue;
            }
            for (ingredient_id, generation) in recipes::recipe_ingredient_generations(&self.db, recipe_id).await? {
                stamp.record(recipe_ingredient_key(recipe_id, &ingredient_id), generation);
            }
        }

        Ok(stamp)
    }

    async fn compute(&self, dish: &Dish) -> Result<AggregateResult> {
        let direct = dishes::load_dish_ingredients(&self.db, &dish.id).await?;
        let edges = dishes::load_dish_recipes(&self.db, &dish.id).await?;

        let mut result = AggregateResult::empty(EntityKind::Dish, dish.id.clone());
        let mut resolved: HashMap<String, Resolution> = HashMap::new();

        for entry in direct {
            let Some(ingredient) = entry.ingredient else {
                result.warn(AggregationWarning::IngredientNotFound {
                    ingredient_id: entry.line.ingredient_id.clone(),
                });
                result.generation.record(ingredient_key(&entry.line.ingredient_id), MISSING_GENERATION);
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
            result.generation.record(ingredient_key(&ingredient.id), resolution.generation);

            for code in &resolution.allergens {
                result.add_contributor(
                    *code,
                    AllergenContributor {
                        ingredient_id: ingredient.id.clone(),
                        ingredient_name: ingredient.name.clone(),
                        brand: ingredient.brand.clone(),
                        quantity: None,
                        unit: None,
                        provenance: resolution.provenance,
                        recipe_id: None,
                        recipe_name: None,
                    },
                );
            }
        }

        for edge in edges {
            let recipe_id = edge.line.recipe_id.clone();

            let Some(recipe_name) = edge.recipe_name else {
                warn!(dish_id = %dish.id, recipe_id = %recipe_id, "Dish references a missing recipe");
                result.warn(AggregationWarning::RecipeNotFound {
                    recipe_id: recipe_id.clone(),
                });
                result.generation.record(recipe_key(&recipe_id), MISSING_GENERATION);
                continue;
            };

            let recipe_aggregate = match self.recipes.aggregate(&recipe_id, false).await {
                Ok(aggregate) => aggregate,
                Err(e) if e.is_datastore_unavailable() => return Err(e),
                Err(Error::NotFound(_)) => {
                    // Deleted between the edge read and the aggregation
                    result.warn(AggregationWarning::RecipeNotFound {
                        recipe_id: recipe_id.clone(),
                    });
                    result.generation.record(recipe_key(&recipe_id), MISSING_GENERATION);
                    continue;
                }
                Err(e) => {
                    warn!(
                        dish_id = %dish.id,
                        recipe_id = %recipe_id,
                        error = %e,
                        "Recipe aggregation failed while aggregating dish"
                    );
                    result.warn(AggregationWarning::RecipeFailed {
                        recipe_id: recipe_id.clone(),
                        message: e.to_string(),
                    });
                    result.generation.record(recipe_key(&recipe_id), MISSING_GENERATION);
                    continue;
                }
            };

            for warning in recipe_aggregate.warnings {
                result.warn(warning);
            }
            for (ingredient_id, generation) in recipe_aggregate.generation.iter() {
                result
                    .generation
                    .record(recipe_ingredient_key(&recipe_id, ingredient_id), *generation);
            }
            for (code, contributors) in recipe_aggregate.source_breakdown {
                for contributor in contributors {
                    result.add_contributor(
                        code,
                        AllergenContributor {
                            recipe_id: Some(recipe_id.clone()),
                            recipe_name: Some(recipe_name.clone()),
                            ..contributor
                        },
                    );
                }
            }
        }

        result.computed_at = Utc::now();
        aggregates::store_aggregate(&self.db, &result, self.max_lock_wait_ms).await?;

        debug!(
            dish_id = %dish.id,
            allergens = result.allergens.len(),
            warnings = result.warnings.len(),
            "Dish aggregate written"
        );
        self.event_bus.emit_lossy(AllergenEvent::AggregateWritten {
            kind: EntityKind::Dish,
            entity_id: dish.id.clone(),
            allergens: result.allergens.iter().copied().collect(),
            timestamp: result.computed_at,
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_keys() {
        assert_eq!(ingredient_key("i-1"), "ingredient:i-1");
        assert_eq!(recipe_key("r-1"), "recipe:r-1");
        assert_eq!(recipe_ingredient_key("r-1", "i-1"), "recipe:r-1/i-1");
    }
}
