//! Ingredient allergen handlers
//!
//! POST /ingredients/batch-ai-detect-allergens,
//! PUT /ingredients/:id/allergens, DELETE /ingredients/:id/allergens/manual

use axum::{
    extract::{Path, State},
    routing::{delete, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::auth::{AuthenticatedCaller, RateLimitedCaller};
use super::reaggregate::ReaggregateResponse;
use super::ApiResponse;
use crate::{
    error::{ApiError, ApiResult},
    services::{DetectionOutcome, DetectionStatus, Dependents, IngredientUpdate},
    AppState,
};

/// Upper bound on ids per batch detection request
pub const MAX_BATCH_DETECT: usize = 500;

/// POST /ingredients/batch-ai-detect-allergens request
#[derive(Debug, Deserialize)]
pub struct BatchDetectRequest {
    pub ingredient_ids: Vec<String>,
}

/// POST /ingredients/batch-ai-detect-allergens response
#[derive(Debug, Serialize)]
pub struct BatchDetectResponse {
    pub results: Vec<DetectionOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Aggregates marked stale by the new inferred sets
    pub invalidated: Dependents,
}

/// PUT /ingredients/:id/allergens request
#[derive(Debug, Deserialize)]
pub struct SetAllergensRequest {
    pub allergens: Vec<String>,
}

/// PUT and DELETE response: the edit plus the scoped re-aggregation it triggered
#[derive(Debug, Serialize)]
pub struct IngredientEditResponse {
    pub ingredient: IngredientUpdate,
    pub reaggregated: ReaggregateResponse,
}

fn count(results: &[DetectionOutcome], status: DetectionStatus) -> usize {
    results.iter().filter(|o| o.status == status).count()
}

/// POST /ingredients/batch-ai-detect-allergens
///
/// Authenticated and rate limited per caller. Manual ingredients are skipped.
pub async fn batch_detect_allergens(
    State(state): State<AppState>,
    RateLimitedCaller(caller): RateLimitedCaller,
    Json(request): Json<BatchDetectRequest>,
) -> ApiResult<Json<ApiResponse<BatchDetectResponse>>> {
    if request.ingredient_ids.is_empty() {
        return Err(ApiError::BadRequest("ingredient_ids must not be empty".to_string()));
    }
    if request.ingredient_ids.len() > MAX_BATCH_DETECT {
        return Err(ApiError::BadRequest(format!(
            "At most {} ingredient_ids per request",
            MAX_BATCH_DETECT
        )));
    }

    info!(caller = %caller, requested = request.ingredient_ids.len(), "Batch allergen detection requested");

    let results = state.engine.resolver.detect(&request.ingredient_ids).await?;

    let mut invalidated = Dependents::default();
    for outcome in results.iter().filter(|o| o.status == DetectionStatus::Success) {
        let dependents = state.engine.editor.invalidate_dependents(&outcome.ingredient_id).await?;
        invalidated.recipe_ids.extend(dependents.recipe_ids);
        invalidated.dish_ids.extend(dependents.dish_ids);
    }
    invalidated.recipe_ids.sort();
    invalidated.recipe_ids.dedup();
    invalidated.dish_ids.sort();
    invalidated.dish_ids.dedup();

    Ok(ApiResponse::ok(BatchDetectResponse {
        succeeded: count(&results, DetectionStatus::Success),
        failed: count(&results, DetectionStatus::Failed),
        skipped: count(&results, DetectionStatus::Skipped),
        results,
        invalidated,
    }))
}

async fn reaggregate_after_edit(state: &AppState, update: IngredientUpdate) -> ApiResult<IngredientEditResponse> {
    let report = state
        .engine
        .batch
        .reaggregate_dependents(&update.invalidated, &CancellationToken::new())
        .await?;

    Ok(IngredientEditResponse {
        reaggregated: ReaggregateResponse::from(&report),
        ingredient: update,
    })
}

/// PUT /ingredients/:id/allergens
///
/// Stores a manual override, then re-aggregates the dependents.
pub async fn set_manual_allergens(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Path(ingredient_id): Path<String>,
    Json(request): Json<SetAllergensRequest>,
) -> ApiResult<Json<ApiResponse<IngredientEditResponse>>> {
    info!(caller = %caller, ingredient_id = %ingredient_id, "Manual allergen override");

    let update = state.engine.editor.set_manual(&ingredient_id, &request.allergens).await?;
    Ok(ApiResponse::ok(reaggregate_after_edit(&state, update).await?))
}

/// DELETE /ingredients/:id/allergens/manual
///
/// Clears the override back to unset, making the ingredient eligible for inference.
pub async fn clear_manual_allergens(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    Path(ingredient_id): Path<String>,
) -> ApiResult<Json<ApiResponse<IngredientEditResponse>>> {
    info!(caller = %caller, ingredient_id = %ingredient_id, "Manual allergen override cleared");

    let update = state.engine.editor.clear_manual(&ingredient_id).await?;
    Ok(ApiResponse::ok(reaggregate_after_edit(&state, update).await?))
}

pub fn ingredient_routes() -> Router<AppState> {
    Router::new()
        .route("/ingredients/batch-ai-detect-allergens", post(batch_detect_allergens))
        .route("/ingredients/:id/allergens", put(set_manual_allergens))
        .route("/ingredients/:id/allergens/manual", delete(clear_manual_allergens))
}
