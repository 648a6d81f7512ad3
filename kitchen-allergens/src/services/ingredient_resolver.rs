//! Ingredient allergen resolution
//!
//! Manual beats inferred. An ingredient whose source is `Unset` is inferred
//! once and written back with a compare-and-set on its generation, so an
//! automated write can never overwrite or downgrade a `Manual` tag that
//! landed in between.

use chrono::Utc;
use kitchen_common::allergens::{consolidate_with_misses, AllergenCode, AllergenSet};
use kitchen_common::events::{AllergenEvent, EventBus};
use kitchen_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::inference::AllergenInference;
use crate::db::ingredients::{self, InferredWrite};
use crate::models::{AggregationWarning, Ingredient, Provenance};

/// Authoritative allergen set of one ingredient
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub allergens: AllergenSet,
    pub provenance: Provenance,
    /// Ingredient generation this resolution corresponds to
    pub generation: i64,
    pub warnings: Vec<AggregationWarning>,
}

/// Per-ingredient status of a batch inference request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub ingredient_id: String,
    pub status: DetectionStatus,
    pub allergens: Vec<AllergenCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DetectionOutcome {
    fn new(ingredient_id: &str, status: DetectionStatus, allergens: &AllergenSet, message: Option<String>) -> Self {
        Self {
            ingredient_id: ingredient_id.to_string(),
            status,
            allergens: allergens.iter().copied().collect(),
            message,
        }
    }
}

/// Result of a single inference attempt
enum Inferred {
    /// Our write landed at this generation
    Stored(AllergenSet, i64),
    /// Another writer got there first; carries the row as it is now
    Lost(Option<Ingredient>),
    Failed(String),
}

#[derive(Clone)]
pub struct IngredientResolver {
    db: SqlitePool,
    inference: Arc<dyn AllergenInference>,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl IngredientResolver {
    pub fn new(
        db: SqlitePool,
        inference: Arc<dyn AllergenInference>,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            inference,
            event_bus,
            max_lock_wait_ms,
        }
    }

    pub fn inference_name(&self) -> &'static str {
        self.inference.name()
    }

    /// Resolve an ingredient's allergen set
    ///
    /// Inference failures never fail the call: the ingredient contributes an
    /// empty `Unset` set and an `InferenceFailed` warning. Only datastore
    /// errors from the write-back are returned as errors.
    pub async fn resolve(&self, ingredient: &Ingredient) -> Result<Resolution> {
        let (stored, misses) = consolidate_with_misses(&ingredient.allergens);
        let mut warnings: Vec<AggregationWarning> = misses
            .into_iter()
            .map(|code| AggregationWarning::UnrecognizedCode {
                ingredient_id: ingredient.id.clone(),
                code,
            })
            .collect();

        match ingredient.provenance() {
            Provenance::Manual | Provenance::Inferred => {
                return Ok(Resolution {
                    allergens: stored,
                    provenance: ingredient.provenance(),
                    generation: ingredient.generation,
                    warnings,
                });
            }
            Provenance::Unset => {}
        }

        match self.infer_and_store(ingredient).await? {
            Inferred::Stored(allergens, generation) => Ok(Resolution {
                allergens,
                provenance: Provenance::Inferred,
                generation,
                warnings,
            }),
            // The row as it is now is authoritative, never the unpersisted guess
            Inferred::Lost(current) => match current {
                Some(current) => {
                    let (allergens, _) = consolidate_with_misses(&current.allergens);
                    Ok(Resolution {
                        allergens,
                        provenance: current.provenance(),
                        generation: current.generation,
                        warnings,
                    })
                }
                None => Ok(Resolution {
                    allergens: AllergenSet::new(),
                    provenance: Provenance::Unset,
                    generation: ingredient.generation,
                    warnings,
                }),
            },
            Inferred::Failed(message) => {
                warnings.push(AggregationWarning::InferenceFailed {
                    ingredient_id: ingredient.id.clone(),
                    message,
                });
                Ok(Resolution {
                    allergens: AllergenSet::new(),
                    provenance: Provenance::Unset,
                    generation: ingredient.generation,
                    warnings,
                })
            }
        }
    }

    /// Run inference for a batch of ingredient ids
    ///
    /// Manual ingredients are skipped. Everything else is re-inferred, even
    /// if it already carries an inferred set.
    pub async fn detect(&self, ingredient_ids: &[String]) -> Result<Vec<DetectionOutcome>> {
        let mut outcomes = Vec::with_capacity(ingredient_ids.len());

        for id in ingredient_ids {
            let ingredient = match ingredients::load_ingredient(&self.db, id).await {
                Ok(Some(ingredient)) => ingredient,
                Ok(None) => {
                    outcomes.push(DetectionOutcome::new(
                        id,
                        DetectionStatus::Failed,
                        &AllergenSet::new(),
                        Some(format!("ingredient {} not found", id)),
                    ));
                    continue;
                }
                Err(e) if e.is_datastore_unavailable() => return Err(e),
                Err(e) => {
                    outcomes.push(DetectionOutcome::new(
                        id,
                        DetectionStatus::Failed,
                        &AllergenSet::new(),
                        Some(e.to_string()),
                    ));
                    continue;
                }
            };

            if ingredient.provenance() == Provenance::Manual {
                let (stored, _) = consolidate_with_misses(&ingredient.allergens);
                outcomes.push(DetectionOutcome::new(
                    id,
                    DetectionStatus::Skipped,
                    &stored,
                    Some("manual allergens are never overwritten".to_string()),
                ));
                continue;
            }

            let outcome = match self.infer_and_store(&ingredient).await? {
                Inferred::Stored(allergens, _) => {
                    DetectionOutcome::new(id, DetectionStatus::Success, &allergens, None)
                }
                Inferred::Lost(current) => {
                    let current_set = current
                        .map(|c| consolidate_with_misses(&c.allergens).0)
                        .unwrap_or_default();
                    DetectionOutcome::new(
                        id,
                        DetectionStatus::Skipped,
                        &current_set,
                        Some("ingredient changed during inference".to_string()),
                    )
                }
                Inferred::Failed(message) => {
                    DetectionOutcome::new(id, DetectionStatus::Failed, &AllergenSet::new(), Some(message))
                }
            };
            outcomes.push(outcome);
        }

        info!(
            requested = ingredient_ids.len(),
            succeeded = outcomes.iter().filter(|o| o.status == DetectionStatus::Success).count(),
            "Batch allergen detection finished"
        );

        Ok(outcomes)
    }

    async fn infer_and_store(&self, ingredient: &Ingredient) -> Result<Inferred> {
        let raw = match self
            .inference
            .infer_allergens(&ingredient.name, ingredient.brand.as_deref())
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    ingredient_id = %ingredient.id,
                    inference = self.inference.name(),
                    error = %e,
                    "Allergen inference failed"
                );
                return Ok(Inferred::Failed(e.to_string()));
            }
        };

        let (allergens, _) = consolidate_with_misses(&raw);

        if let Some(generation) = self.store_inferred(&ingredient.id, ingredient.generation, &allergens).await? {
            return Ok(Inferred::Stored(allergens, generation));
        }
        debug!(
            ingredient_id = %ingredient.id,
            expected_generation = ingredient.generation,
            "Inferred write rejected, ingredient changed concurrently"
        );

        // A cleared override leaves the row Unset at a newer generation; retry once there
        let current = ingredients::load_ingredient(&self.db, &ingredient.id).await?;
        if let Some(row) = current.as_ref().filter(|row| row.provenance() == Provenance::Unset) {
            if let Some(generation) = self.store_inferred(&row.id, row.generation, &allergens).await? {
                return Ok(Inferred::Stored(allergens, generation));
            }
            let current = ingredients::load_ingredient(&self.db, &ingredient.id).await?;
            return Ok(Inferred::Lost(current));
        }
        Ok(Inferred::Lost(current))
    }

    /// Compare-and-set an inferred set; the new generation when it landed
    async fn store_inferred(&self, ingredient_id: &str, expected_generation: i64, allergens: &AllergenSet) -> Result<Option<i64>> {
        let written = ingredients::write_inferred_allergens(
            &self.db,
            ingredient_id,
            expected_generation,
            allergens,
            self.max_lock_wait_ms,
        )
        .await?;

        match written {
            InferredWrite::Written(generation) => {
                debug!(
                    ingredient_id = %ingredient_id,
                    generation,
                    allergens = allergens.len(),
                    "Stored inferred allergens"
                );
                self.event_bus.emit_lossy(AllergenEvent::IngredientAllergensChanged {
                    ingredient_id: ingredient_id.to_string(),
                    allergens: allergens.iter().copied().collect(),
                    provenance: Provenance::Inferred.as_str().to_string(),
                    generation,
                    timestamp: Utc::now(),
                });
                Ok(Some(generation))
            }
            InferredWrite::Rejected => Ok(None),
        }
    }
}
