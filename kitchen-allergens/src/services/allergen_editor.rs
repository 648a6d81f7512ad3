//! User edits of ingredient allergens and dependent invalidation
//!
//! The only path that sets or clears a `Manual` tag. Every write bumps the
//! ingredient generation and marks dependent aggregates stale.

use chrono::Utc;
use kitchen_common::allergens::{consolidate_with_misses, AllergenCode, AllergenSet};
use kitchen_common::events::{AllergenEvent, EntityKind, EventBus};
use kitchen_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use super::batch_orchestrator::Dependents;
use crate::db::{aggregates, dishes, ingredients, recipes};
use crate::models::Provenance;

/// Result of a user edit
#[derive(Debug, Clone, Serialize)]
pub struct IngredientUpdate {
    pub ingredient_id: String,
    pub allergens: Vec<AllergenCode>,
    pub provenance: Provenance,
    pub generation: i64,
    /// Submitted codes that were not recognized and were dropped
    pub unrecognized: Vec<String>,
    pub invalidated: Dependents,
}

#[derive(Clone)]
pub struct AllergenEditor {
    db: SqlitePool,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl AllergenEditor {
    pub fn new(db: SqlitePool, event_bus: EventBus, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Store a manual allergen set (tag `Manual`)
    pub async fn set_manual(&self, ingredient_id: &str, codes: &[String]) -> Result<IngredientUpdate> {
        let (allergens, unrecognized) = consolidate_with_misses(codes);

        let generation = ingredients::set_manual_allergens(&self.db, ingredient_id, &allergens, self.max_lock_wait_ms)
            .await?
            .ok_or_else(|| Error::not_found("ingredient", ingredient_id))?;

        self.finish(ingredient_id, allergens, Provenance::Manual, generation, unrecognized)
            .await
    }

    /// Clear a manual override back to `Unset`, making the ingredient eligible for inference
    pub async fn clear_manual(&self, ingredient_id: &str) -> Result<IngredientUpdate> {
        let generation = ingredients::clear_manual_allergens(&self.db, ingredient_id, self.max_lock_wait_ms)
            .await?
            .ok_or_else(|| Error::not_found("ingredient", ingredient_id))?;

        self.finish(ingredient_id, AllergenSet::new(), Provenance::Unset, generation, Vec::new())
            .await
    }

    async fn finish(
        &self,
        ingredient_id: &str,
        allergens: AllergenSet,
        provenance: Provenance,
        generation: i64,
        unrecognized: Vec<String>,
    ) -> Result<IngredientUpdate> {
        info!(
            ingredient_id,
            provenance = provenance.as_str(),
            generation,
            allergens = allergens.len(),
            "Ingredient allergens edited"
        );

        self.event_bus.emit_lossy(AllergenEvent::IngredientAllergensChanged {
            ingredient_id: ingredient_id.to_string(),
            allergens: allergens.iter().copied().collect(),
            provenance: provenance.as_str().to_string(),
            generation,
            timestamp: Utc::now(),
        });

        let invalidated = self.invalidate_dependents(ingredient_id).await?;

        Ok(IngredientUpdate {
            ingredient_id: ingredient_id.to_string(),
            allergens: allergens.into_iter().collect(),
            provenance,
            generation,
            unrecognized,
            invalidated,
        })
    }

    /// Mark every recipe using the ingredient, and every dish using it
    /// directly or through one of those recipes, stale
    pub async fn invalidate_dependents(&self, ingredient_id: &str) -> Result<Dependents> {
        let recipe_ids = recipes::recipes_using_ingredient(&self.db, ingredient_id).await?;

        let mut dish_ids = dishes::dishes_using_ingredient(&self.db, ingredient_id).await?;
        dish_ids.extend(dishes::dishes_using_recipes(&self.db, &recipe_ids).await?);
        dish_ids.sort();
        dish_ids.dedup();

        aggregates::mark_stale(&self.db, EntityKind::Recipe, &recipe_ids).await?;
        aggregates::mark_stale(&self.db, EntityKind::Dish, &dish_ids).await?;

        Ok(Dependents { recipe_ids, dish_ids })
    }
}
