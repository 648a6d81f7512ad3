//! Two-phase batch re-aggregation
//!
//! Phase R re-aggregates recipes, Phase D re-aggregates dishes. Phase D
//! never starts before every Phase R entity has finished, because dish
//! aggregates read the recipe aggregates Phase R writes. Both phases run on
//! a bounded pool (`buffer_unordered`) and isolate per-entity failures.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use kitchen_common::events::{AllergenEvent, EntityKind, EventBus};
use kitchen_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::dish_aggregator::DishAggregator;
use super::recipe_aggregator::RecipeAggregator;
use crate::db::{dishes, recipes};
use crate::models::{AggregateResult, BatchReport, EntityOutcome, PhaseReport};

/// Recipes and dishes that must be re-aggregated after an ingredient change
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Dependents {
    pub recipe_ids: Vec<String>,
    pub dish_ids: Vec<String>,
}

impl Dependents {
    pub fn is_empty(&self) -> bool {
        self.recipe_ids.is_empty() && self.dish_ids.is_empty()
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    db: SqlitePool,
    recipes: RecipeAggregator,
    dishes: DishAggregator,
    event_bus: EventBus,
    worker_pool_size: usize,
}

impl BatchOrchestrator {
    pub fn new(
        db: SqlitePool,
        recipes: RecipeAggregator,
        dishes: DishAggregator,
        event_bus: EventBus,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            db,
            recipes,
            dishes,
            event_bus,
            worker_pool_size: worker_pool_size.max(1),
        }
    }

    /// Re-aggregate the whole catalog
    ///
    /// Only a datastore outage is returned as an error; every other failure
    /// is an entry in the report. Safe to re-run at any time.
    pub async fn reaggregate_all(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let recipe_ids = recipes::list_recipe_ids(&self.db).await?;
        let dish_ids = dishes::list_dish_ids(&self.db).await?;

        info!(
            recipes = recipe_ids.len(),
            dishes = dish_ids.len(),
            workers = self.worker_pool_size,
            "Starting full allergen re-aggregation"
        );

        self.run(recipe_ids, dish_ids, cancel).await
    }

    /// Re-aggregate only the given dependents, recipes first
    pub async fn reaggregate_dependents(&self, dependents: &Dependents, cancel: &CancellationToken) -> Result<BatchReport> {
        self.run(dependents.recipe_ids.clone(), dependents.dish_ids.clone(), cancel)
            .await
    }

    async fn run(&self, recipe_ids: Vec<String>, dish_ids: Vec<String>, cancel: &CancellationToken) -> Result<BatchReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        let recipes = self.run_phase(EntityKind::Recipe, recipe_ids, cancel).await?;

        // Hard barrier: run_phase only returns once every recipe has drained
        let dishes = if cancel.is_cancelled() {
            info!(dishes = dish_ids.len(), "Batch cancelled before dish phase");
            PhaseReport::all_skipped(EntityKind::Dish, dish_ids)
        } else {
            self.run_phase(EntityKind::Dish, dish_ids, cancel).await?
        };

        let cancelled = cancel.is_cancelled();
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            recipes_succeeded = recipes.succeeded,
            recipes_failed = recipes.failed,
            dishes_succeeded = dishes.succeeded,
            dishes_failed = dishes.failed,
            cancelled,
            duration_ms,
            "Allergen re-aggregation finished"
        );
        self.event_bus.emit_lossy(AllergenEvent::BatchCompleted {
            cancelled,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(BatchReport {
            recipes,
            dishes,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_phase(&self, phase: EntityKind, ids: Vec<String>, cancel: &CancellationToken) -> Result<PhaseReport> {
        info!(phase = %phase, total = ids.len(), "Batch phase started");
        self.event_bus.emit_lossy(AllergenEvent::BatchPhaseStarted {
            phase,
            total: ids.len(),
            timestamp: Utc::now(),
        });

        let outcomes: Vec<(String, Option<Result<AggregateResult>>)> = stream::iter(ids)
            .map(|id| {
                let recipes = self.recipes.clone();
                let dishes = self.dishes.clone();
                let cancel = cancel.clone();

                async move {
                    // Entities not yet started when cancelled are skipped
                    if cancel.is_cancelled() {
                        return (id, None);
                    }

                    let result = match phase {
                        EntityKind::Recipe => recipes.aggregate(&id, true).await,
                        EntityKind::Dish => dishes.aggregate(&id, true).await,
                    };
                    (id, Some(result))
                }
            })
            .buffer_unordered(self.worker_pool_size)
            .collect()
            .await;

        let mut report = PhaseReport::new(phase);
        let mut unavailable: Vec<Error> = Vec::new();

        for (id, outcome) in outcomes {
            let outcome = match outcome {
                None => EntityOutcome::Skipped,
                Some(Ok(result)) => EntityOutcome::Aggregated {
                    allergens: result.allergens.iter().copied().collect(),
                    warnings: result.warnings.len(),
                },
                Some(Err(e)) => {
                    error!(phase = %phase, entity_id = %id, error = %e, "Entity re-aggregation failed");
                    let message = e.to_string();
                    if e.is_datastore_unavailable() {
                        unavailable.push(e);
                    }
                    EntityOutcome::Failed { error: message }
                }
            };
            report.record(id, outcome);
        }

        if report.attempted > 0 && unavailable.len() == report.attempted {
            error!(phase = %phase, attempted = report.attempted, "Datastore unavailable for every entity, aborting batch");
            if let Some(e) = unavailable.pop() {
                return Err(e);
            }
        }

        info!(
            phase = %phase,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Batch phase completed"
        );
        self.event_bus.emit_lossy(AllergenEvent::BatchPhaseCompleted {
            phase,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            timestamp: Utc::now(),
        });

        Ok(report)
    }
}
